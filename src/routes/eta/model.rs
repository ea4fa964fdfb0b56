use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use sqlx::PgPool;

use crate::geo::GeoBucket;
use crate::routing::{RouteEstimate, TravelMode};

/// 已解析 ETA 的持久化缓存条目，按 cache_key 幂等覆盖
///
/// 条目一经写入只读；过期靠 expires_at 过滤，物理清理交给后台任务
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct EtaCacheEntry {
    pub cache_key: String,
    pub origin_bucket: String,
    pub dest_bucket: String,
    pub mode: String,
    pub duration_seconds: i64,
    pub distance_meters: f64,
    pub computed_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub provider: String,
}

impl EtaCacheEntry {
    /// 只有成功的解析结果才允许生成缓存条目，失败的计算绝不落库
    pub fn from_estimate(
        cache_key: &str,
        origin_bucket: &GeoBucket,
        dest_bucket: &GeoBucket,
        mode: TravelMode,
        estimate: &RouteEstimate,
        now: DateTime<Utc>,
        ttl_secs: u64,
    ) -> Option<Self> {
        if estimate.duration_seconds <= 0 || estimate.distance_meters < 0.0 {
            return None;
        }
        Some(Self {
            cache_key: cache_key.to_string(),
            origin_bucket: origin_bucket.key(),
            dest_bucket: dest_bucket.key(),
            mode: mode.as_str().to_string(),
            duration_seconds: estimate.duration_seconds,
            distance_meters: estimate.distance_meters,
            computed_at: now,
            expires_at: now + Duration::seconds(ttl_secs as i64),
            provider: estimate.provider.clone(),
        })
    }

    pub fn to_estimate(&self) -> RouteEstimate {
        RouteEstimate {
            duration_seconds: self.duration_seconds,
            distance_meters: self.distance_meters,
            provider: self.provider.clone(),
            duration_in_traffic_seconds: None,
        }
    }

    /// 批量读取，只返回未过期的条目
    pub async fn get_many(
        pool: &PgPool,
        keys: &[String],
    ) -> Result<HashMap<String, Self>, sqlx::Error> {
        if keys.is_empty() {
            return Ok(HashMap::new());
        }

        let rows = sqlx::query_as::<_, EtaCacheEntry>(
            r#"
            SELECT cache_key, origin_bucket, dest_bucket, mode,
                   duration_seconds, distance_meters, computed_at, expires_at, provider
            FROM eta_cache
            WHERE cache_key = ANY($1) AND expires_at > NOW()
            "#,
        )
        .bind(keys.to_vec())
        .fetch_all(pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|entry| (entry.cache_key.clone(), entry))
            .collect())
    }

    /// 幂等 upsert；并发写同一个 key 时后写覆盖，内容等价，无需加锁
    pub async fn put_many(pool: &PgPool, entries: &[Self]) -> Result<(), sqlx::Error> {
        for entry in entries {
            sqlx::query(
                r#"
                INSERT INTO eta_cache (
                    cache_key, origin_bucket, dest_bucket, mode,
                    duration_seconds, distance_meters, computed_at, expires_at, provider
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
                ON CONFLICT (cache_key)
                DO UPDATE SET
                    duration_seconds = EXCLUDED.duration_seconds,
                    distance_meters = EXCLUDED.distance_meters,
                    computed_at = EXCLUDED.computed_at,
                    expires_at = EXCLUDED.expires_at,
                    provider = EXCLUDED.provider
                "#,
            )
            .bind(&entry.cache_key)
            .bind(&entry.origin_bucket)
            .bind(&entry.dest_bucket)
            .bind(&entry.mode)
            .bind(entry.duration_seconds)
            .bind(entry.distance_meters)
            .bind(entry.computed_at)
            .bind(entry.expires_at)
            .bind(&entry.provider)
            .execute(pool)
            .await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geo::{Coordinate, bucket};
    use crate::routing::PROVIDER_ROUTES_V2;

    fn buckets() -> (GeoBucket, GeoBucket) {
        (
            bucket(Coordinate::new(51.5074, -0.1278), 2),
            bucket(Coordinate::new(51.5099, -0.1181), 2),
        )
    }

    #[test]
    fn entry_carries_ttl_aligned_expiry() {
        let (o, d) = buckets();
        let now = Utc::now();
        let estimate = RouteEstimate {
            duration_seconds: 240,
            distance_meters: 1800.0,
            provider: PROVIDER_ROUTES_V2.to_string(),
            duration_in_traffic_seconds: Some(300),
        };
        let entry =
            EtaCacheEntry::from_estimate("k", &o, &d, TravelMode::Drive, &estimate, now, 600)
                .unwrap();
        assert_eq!(entry.expires_at, now + Duration::seconds(600));
        assert_eq!(entry.mode, "DRIVE");
        assert_eq!(entry.provider, PROVIDER_ROUTES_V2);
        // 路况耗时不进缓存，读出来的条目只有静态耗时
        assert_eq!(entry.to_estimate().duration_in_traffic_seconds, None);
    }

    #[test]
    fn failed_computations_never_become_entries() {
        let (o, d) = buckets();
        let now = Utc::now();
        let zero = RouteEstimate {
            duration_seconds: 0,
            distance_meters: 100.0,
            provider: PROVIDER_ROUTES_V2.to_string(),
            duration_in_traffic_seconds: None,
        };
        assert!(
            EtaCacheEntry::from_estimate("k", &o, &d, TravelMode::Walk, &zero, now, 600).is_none()
        );

        let negative = RouteEstimate {
            duration_seconds: 60,
            distance_meters: -1.0,
            provider: PROVIDER_ROUTES_V2.to_string(),
            duration_in_traffic_seconds: None,
        };
        assert!(
            EtaCacheEntry::from_estimate("k", &o, &d, TravelMode::Walk, &negative, now, 600)
                .is_none()
        );
    }
}
