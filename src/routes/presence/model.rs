use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::PgPool;
use uuid::Uuid;

use crate::geo::{Coordinate, GeoBucket, bucket};

/// 双精度定位记录：私有表存精确坐标，公开表只存网格化坐标
///
/// hide_proximity 打开时两张表都落 NULL，旧坐标物理清空，
/// 不能依赖读路径过滤来保护隐私
#[derive(Debug, Serialize, sqlx::FromRow)]
pub struct PresenceRecord {
    pub user_id: Uuid,
    pub precise_lat: Option<f64>,
    pub precise_lng: Option<f64>,
    pub accuracy_m: Option<f64>,
    pub bucketed_lat: Option<f64>,
    pub bucketed_lng: Option<f64>,
    pub hide_proximity: bool,
    pub updated_at: DateTime<Utc>,
}

/// 计算两张表实际要落的值：隐藏时两边都是 NULL，可见时必须带坐标
pub fn project_for_storage(
    coord: Option<Coordinate>,
    hide_proximity: bool,
    bucket_decimals: u32,
) -> Result<(Option<Coordinate>, Option<GeoBucket>), sqlx::Error> {
    if hide_proximity {
        return Ok((None, None));
    }
    let coord = coord.ok_or_else(|| {
        sqlx::Error::Protocol("coordinates required unless proximity is hidden".into())
    })?;
    Ok((Some(coord), Some(bucket(coord, bucket_decimals))))
}

impl PresenceRecord {
    /// 私有、公开两张表先后写入；不要求跨表事务，公开表最后落盘，
    /// 读方最多短暂看到旧的公开网格
    pub async fn upsert(
        pool: &PgPool,
        user_id: Uuid,
        coord: Option<Coordinate>,
        accuracy_m: Option<f64>,
        hide_proximity: bool,
        bucket_decimals: u32,
    ) -> Result<(), sqlx::Error> {
        let (precise, bucketed) = project_for_storage(coord, hide_proximity, bucket_decimals)?;

        sqlx::query(
            r#"
            INSERT INTO user_locations (user_id, latitude, longitude, accuracy_m, hide_proximity, updated_at)
            VALUES ($1, $2, $3, $4, $5, NOW())
            ON CONFLICT (user_id)
            DO UPDATE SET
                latitude = EXCLUDED.latitude,
                longitude = EXCLUDED.longitude,
                accuracy_m = EXCLUDED.accuracy_m,
                hide_proximity = EXCLUDED.hide_proximity,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(user_id)
        .bind(precise.map(|c| c.lat))
        .bind(precise.map(|c| c.lng))
        .bind(if hide_proximity { None } else { accuracy_m })
        .bind(hide_proximity)
        .execute(pool)
        .await?;

        sqlx::query(
            r#"
            INSERT INTO user_presence_public (user_id, bucketed_lat, bucketed_lng, updated_at)
            VALUES ($1, $2, $3, NOW())
            ON CONFLICT (user_id)
            DO UPDATE SET
                bucketed_lat = EXCLUDED.bucketed_lat,
                bucketed_lng = EXCLUDED.bucketed_lng,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(user_id)
        .bind(bucketed.map(|b| b.lat))
        .bind(bucketed.map(|b| b.lng))
        .execute(pool)
        .await?;

        Ok(())
    }

    pub async fn find_by_user(
        pool: &PgPool,
        user_id: Uuid,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, PresenceRecord>(
            r#"
            SELECT
                l.user_id,
                l.latitude AS precise_lat,
                l.longitude AS precise_lng,
                l.accuracy_m,
                p.bucketed_lat,
                p.bucketed_lng,
                l.hide_proximity,
                l.updated_at
            FROM user_locations l
            LEFT JOIN user_presence_public p ON p.user_id = l.user_id
            WHERE l.user_id = $1
            "#,
        )
        .bind(user_id)
        .fetch_optional(pool)
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hidden_proximity_blanks_both_projections() {
        // 带着有效坐标请求隐藏，两张表也必须落 NULL
        let (precise, bucketed) =
            project_for_storage(Some(Coordinate::new(51.5074, -0.1278)), true, 3).unwrap();
        assert!(precise.is_none());
        assert!(bucketed.is_none());

        let (precise, bucketed) = project_for_storage(None, true, 3).unwrap();
        assert!(precise.is_none());
        assert!(bucketed.is_none());
    }

    #[test]
    fn visible_update_buckets_public_projection() {
        let (precise, bucketed) =
            project_for_storage(Some(Coordinate::new(51.50748, -0.12782)), false, 3).unwrap();
        let precise = precise.unwrap();
        let bucketed = bucketed.unwrap();
        assert_eq!(precise.lat, 51.50748);
        assert_eq!(precise.lng, -0.12782);
        // 公开表只允许网格化坐标
        assert_eq!(bucketed.lat, 51.507);
        assert_eq!(bucketed.lng, -0.128);
    }

    #[test]
    fn visible_update_without_coordinates_is_rejected() {
        assert!(project_for_storage(None, false, 3).is_err());
    }
}
