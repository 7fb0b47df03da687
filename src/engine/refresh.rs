//! The per-getter refresh cycle:
//! list → dedup → detail-fetch → persist → policy-filter → push-fanout.
//!
//! Failure scopes, narrowest feasible first: a single detail fetch or a
//! single push failing is caught, logged, and alerted without touching
//! sibling work; only an error that escapes per-item isolation (the list
//! call itself, the store rejecting a read) fails the cycle and feeds the
//! consecutive-failure escalation counter.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use anyhow::Result;
use metrics::counter;
use regex::Regex;
use serde::Serialize;
use tokio::task::JoinSet;
use tracing::{debug, error, info};

use super::{Engine, GetterSlot};
use crate::adapter::{ItemDetail, NetContext};
use crate::config::AppConfig;
use crate::envelope::Envelope;
use crate::store::Article;

/// One newly discovered item, as reported to the task/status API.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NewArticle {
    pub id: String,
    pub user_id: String,
    pub ts: i64,
    pub content: Envelope,
}

pub type RefreshReport = Vec<NewArticle>;

/// Run one cycle. The `working` flag is claimed atomically up front; a
/// busy getter skips the cycle entirely (not queued, not retried). The
/// flag is cleared unconditionally on the way out.
pub(crate) async fn run_cycle(engine: Arc<Engine>, slot: Arc<GetterSlot>) -> RefreshReport {
    let cfg = engine.config.snapshot();

    if !slot.begin_cycle() {
        debug!(target: "refresh", getter = %slot.spec, "busy, cycle skipped");
        return Vec::new();
    }
    counter!("refresh_cycles_total").increment(1);
    debug!(target: "refresh", getter = %slot.spec, "cycle start");

    let report = match cycle_inner(&engine, &slot, &cfg).await {
        Ok(report) => {
            slot.failures.store(0, Ordering::SeqCst);
            slot.first.store(false, Ordering::SeqCst);
            debug!(target: "refresh", getter = %slot.spec, new = report.len(), "cycle finished");
            report
        }
        Err(e) => {
            counter!("refresh_failures_total").increment(1);
            error!(target: "refresh", getter = %slot.spec, error = %format!("{e:#}"), "cycle failed");

            let failures = slot.failures.fetch_add(1, Ordering::SeqCst) + 1;
            // Exact threshold match only; past the highest threshold the
            // counter keeps climbing silently until a success resets it.
            if cfg.alert.escalation_failures.contains(&failures) {
                engine
                    .alert(Envelope::new().text(format!(
                        "{} failed to refresh {failures} times in a row.\nLatest error: {e:#}",
                        slot.spec
                    )))
                    .await;
            }
            Vec::new()
        }
    };

    slot.end_cycle();
    report
}

async fn cycle_inner(
    engine: &Arc<Engine>,
    slot: &Arc<GetterSlot>,
    cfg: &Arc<AppConfig>,
) -> Result<RefreshReport> {
    let net = NetContext::with_proxy(cfg.network.proxy.as_deref())?;
    let prefix = format!("{}_", slot.spec.class_name);

    let raw_ids = slot.getter.list(&net).await?;
    debug!(target: "refresh", getter = %slot.spec, listed = raw_ids.len(), "got latest list");

    // Prefix for global uniqueness, then drop everything already recorded.
    let mut new_ids: Vec<String> = Vec::new();
    for raw in raw_ids {
        let id = format!("{prefix}{raw}");
        if engine.store.exists(&id)? {
            debug!(target: "refresh", getter = %slot.spec, id = %id, "exists, passed");
        } else {
            info!(target: "refresh", getter = %slot.spec, id = %id, "new article");
            new_ids.push(id);
        }
    }
    if new_ids.is_empty() {
        return Ok(Vec::new());
    }

    if cfg.policy.merged_details && slot.getter.supports_batched_detail() {
        return merged_fetch(engine, slot, cfg, &prefix, &new_ids, &net).await;
    }

    // One independent fetch per id; a failure on one id never cancels the
    // others.
    let mut set: JoinSet<Option<NewArticle>> = JoinSet::new();
    for id in new_ids {
        let engine = engine.clone();
        let slot = slot.clone();
        let cfg = cfg.clone();
        let net = net.clone();
        let prefix = prefix.clone();
        set.spawn(async move {
            let raw_id = id.strip_prefix(&prefix).unwrap_or(&id).to_string();
            let outcome = async {
                let mut detail = slot.getter.detail(&raw_id, &net).await?;
                detail.user_id = format!("{prefix}{}", detail.user_id);
                process_item(&engine, &slot, &cfg, &id, detail, &net).await
            }
            .await;
            match outcome {
                Ok(article) => Some(article),
                Err(e) => {
                    detail_fault(&engine, &slot, &id, &e).await;
                    None
                }
            }
        });
    }

    let mut report = Vec::new();
    while let Some(joined) = set.join_next().await {
        if let Ok(Some(article)) = joined {
            report.push(article);
        }
    }
    Ok(report)
}

/// Batched path: one detail call covers every new id; an error here is an
/// item-level fault for the whole batch, not a cycle failure.
async fn merged_fetch(
    engine: &Arc<Engine>,
    slot: &Arc<GetterSlot>,
    cfg: &Arc<AppConfig>,
    prefix: &str,
    new_ids: &[String],
    net: &NetContext,
) -> Result<RefreshReport> {
    let raw_ids: Vec<String> = new_ids
        .iter()
        .map(|id| id.strip_prefix(prefix).unwrap_or(id).to_string())
        .collect();

    let outcome = async {
        let mut detail = slot.getter.details(&raw_ids, net).await?;
        detail.user_id = format!("{prefix}{}", detail.user_id);

        let mut report = Vec::new();
        for (i, id) in new_ids.iter().enumerate() {
            // Persist every id; policy and fan-out run once for the merged
            // content, on the last id.
            let last = i + 1 == new_ids.len();
            if last {
                report.push(process_item(engine, slot, cfg, id, detail.clone(), net).await?);
            } else {
                engine.store.record(&Article::from_detail(id, &detail))?;
                counter!("articles_new_total").increment(1);
                report.push(NewArticle {
                    id: id.clone(),
                    user_id: detail.user_id.clone(),
                    ts: detail.ts,
                    content: detail.content.clone(),
                });
            }
        }
        Ok::<RefreshReport, anyhow::Error>(report)
    }
    .await;

    match outcome {
        Ok(report) => Ok(report),
        Err(e) => {
            detail_fault(engine, slot, &new_ids.join(", "), &e).await;
            Ok(Vec::new())
        }
    }
}

/// Persist the article, then decide whether to push and fan out. Recording
/// happens before any push attempt so a crash cannot cause the same id to
/// be listed and fetched again.
async fn process_item(
    engine: &Arc<Engine>,
    slot: &Arc<GetterSlot>,
    cfg: &Arc<AppConfig>,
    id: &str,
    detail: ItemDetail,
    net: &NetContext,
) -> Result<NewArticle> {
    let article = Article::from_detail(id, &detail);
    engine.store.record(&article)?;
    counter!("articles_new_total").increment(1);

    let content_text = detail.content.to_string();
    let mut skip_reasons: Vec<String> = Vec::new();

    if slot.is_first_refresh() && cfg.policy.skip_first {
        skip_reasons.push("skip_first".to_string());
    }
    for rule in &cfg.policy.block_rules {
        match Regex::new(rule) {
            Ok(re) => {
                if re.is_match(&content_text) {
                    skip_reasons.push(format!("block_rule {rule:?}"));
                }
            }
            Err(e) => {
                tracing::warn!(target: "refresh", rule = %rule, error = %e, "invalid block rule ignored");
            }
        }
    }
    let age_days = (chrono::Utc::now().timestamp() - detail.ts) as f64 / 86_400.0;
    if age_days > f64::from(cfg.policy.article_max_age_days) {
        skip_reasons.push("exceeds article_max_age_days".to_string());
    }

    if skip_reasons.is_empty() {
        // Routing is looked up fresh so last-moment pair edits are honored.
        for route in engine.routes_for(&slot.name()) {
            match engine.push_to_spec(&route, &detail.content, net).await {
                Ok(()) => {
                    counter!("pushes_total").increment(1);
                }
                Err(e) => {
                    counter!("push_failures_total").increment(1);
                    error!(
                        target: "push",
                        getter = %slot.spec, id = %id, dest = %route,
                        error = %format!("{e:#}"),
                        "push failed"
                    );
                    engine
                        .alert(Envelope::new().text(format!(
                            "Failed to push {id} to {route}:\n{}\n{e:#}",
                            detail.content
                        )))
                        .await;
                }
            }
        }
    } else {
        debug!(
            target: "refresh",
            getter = %slot.spec, id = %id,
            reasons = %skip_reasons.join(", "),
            "push skipped"
        );
    }

    Ok(NewArticle {
        id: id.to_string(),
        user_id: detail.user_id,
        ts: detail.ts,
        content: detail.content,
    })
}

async fn detail_fault(engine: &Arc<Engine>, slot: &Arc<GetterSlot>, what: &str, err: &anyhow::Error) {
    error!(
        target: "refresh",
        getter = %slot.spec, id = %what,
        error = %format!("{err:#}"),
        "failed to get detail"
    );
    engine
        .alert(Envelope::new().text(format!(
            "{} failed to get detail of {what}: {err:#}",
            slot.spec
        )))
        .await;
}
