//! 保留策略：每个存储最多保留 `keep` 个产物

use std::collections::BTreeSet;
use std::future::Future;
use tracing::{debug, info, warn};

use crate::error::Result;

/// 计算需要删除的产物
///
/// 候选集为已有产物加上新产物（去重），按字典序（即时间顺序）排序后保留最新的 `keep` 个，
/// 返回其余产物，最旧的在前。`keep <= 0` 时不删除任何产物。
pub fn plan(new_key: &str, existing: &[String], keep: i64) -> Vec<String> {
    if keep <= 0 {
        return Vec::new();
    }

    // 新产物总是保留，其余产物只保留最新的 keep - 1 个
    let others: BTreeSet<&str> = existing
        .iter()
        .map(String::as_str)
        .filter(|key| *key != new_key)
        .collect();

    let keep_others = usize::try_from(keep - 1).unwrap_or(usize::MAX);
    let excess = others.len().saturating_sub(keep_others);
    others.into_iter().take(excess).map(str::to_string).collect()
}

/// 执行保留策略，删除失败只记录日志，不影响其余产物的删除
pub async fn cycle<F, Fut>(new_key: &str, existing: &[String], keep: i64, mut delete: F)
where
    F: FnMut(String) -> Fut,
    Fut: Future<Output = Result<()>>,
{
    let expired = plan(new_key, existing, keep);
    if expired.is_empty() {
        debug!(keep, existing = existing.len(), "无需清理旧备份");
        return;
    }

    for key in expired {
        info!(key = %key, keep, "删除过期备份");
        if let Err(e) = delete(key.clone()).await {
            warn!(key = %key, error = %e, "删除过期备份失败");
        }
    }
}
