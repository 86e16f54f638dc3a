//! Argument-less member sync; exits non-zero on configuration or storage failure.

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    cq_sync::init_tracing();
    let summary = cq_sync::run_job_from_env(cq_sync::JobKind::Members).await?;
    println!(
        "members sync complete: run_id={} pages={} records={} details_missing={}",
        summary.run_id, summary.pages_fetched, summary.records_upserted, summary.details_missing
    );
    Ok(())
}
