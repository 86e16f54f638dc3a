//! Argument-less legislation sync over the stored current members.

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    cq_sync::init_tracing();
    let summary = cq_sync::run_job_from_env(cq_sync::JobKind::Legislation).await?;
    println!(
        "legislation sync complete: run_id={} records={} sponsorships={} members_skipped={}",
        summary.run_id,
        summary.records_upserted,
        summary.sponsorships_upserted,
        summary.members_skipped
    );
    Ok(())
}
