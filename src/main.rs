use std::time::{Duration, Instant};

use clap::Parser;
use serde_json::json;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use api_client::HttpRecordEndpoint;
use emr_core::{
    AutosaveTick, DocumentSession, InMemoryRecordEndpoint, LeaveDecision, RecordEndpoint,
    SaveOutcome, SessionConfig,
};
use emr_types::RecordId;

#[derive(Parser, Debug)]
#[command(
    name = "emr-run",
    about = "Walks a clinical record through drafting, a two-writer conflict, signing, and an amendment"
)]
struct Args {
    /// Base URL of a record service. Without it the walkthrough runs
    /// against the in-memory endpoint.
    #[arg(long)]
    server: Option<String>,

    /// Bearer token for the record service.
    #[arg(long)]
    token: Option<String>,

    /// Identity of the record to edit.
    #[arg(long, default_value = "enc-demo-1")]
    identity: String,
}

/// Main entry point for the record editing walkthrough
///
/// Runs the whole editing story against either the in-memory endpoint
/// (default) or a record service named with `--server`:
/// draft, autosave, a losing write, compare, reload, sign, amend,
/// printing versions, status lines, history, and a field diff as it goes.
///
/// # Environment Variables
/// - `RUST_LOG`: log filter, e.g. `emr_core=debug` (a `.env` file is read)
///
/// # Returns
/// * `Ok(())` - If the walkthrough completes
/// * `Err(anyhow::Error)` - On setup failures or unexpected endpoint errors
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("emr_core=info".parse()?)
                .add_directive("emr_run=info".parse()?),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();
    let identity = RecordId::new(&args.identity)?;

    match args.server {
        Some(url) => {
            let mut client = HttpRecordEndpoint::new(&url)?;
            if let Some(token) = args.token {
                client = client.with_bearer_token(token);
            }
            tracing::info!("++ Editing {} on {}", identity, client.base_url());
            run(client.clone(), client, identity).await
        }
        None => {
            let store = InMemoryRecordEndpoint::new("dr-osei");
            tracing::info!("++ Editing {} on the in-memory endpoint", identity);
            let rival = store.handle_for("dr-ng");
            run(store, rival, identity).await
        }
    }
}

/// Runs the walkthrough. `rival` writes as a second clinician to provoke
/// the version conflict in the middle of the story.
async fn run<E: RecordEndpoint>(mine: E, rival: E, identity: RecordId) -> anyhow::Result<()> {
    // Short timings so the walkthrough does not dawdle at the default
    // three-second debounce.
    let config = SessionConfig::new(
        Duration::from_millis(600),
        Duration::from_secs(6),
        Duration::from_secs(10),
        3,
        50,
        true,
    )?;

    let mut session = DocumentSession::open(mine, identity.clone(), config.clone()).await?;
    println!(
        "opened {} at v{} [{}]",
        session.identity(),
        session.version(),
        session.status_line()
    );

    // Draft the encounter and let autosave pick it up.
    session.set_field(
        "complaints",
        json!("persistent cough, two weeks"),
        Instant::now(),
    );
    session.set_field("history", json!("non-smoker; no fever"), Instant::now());
    pump_autosave(&mut session).await;
    println!(
        "autosave landed v{} [{}]",
        session.version(),
        session.status_line()
    );

    // A colleague updates the same record in the meantime.
    {
        let mut other = DocumentSession::open(rival, identity.clone(), config.clone()).await?;
        other.set_field("treatment", json!("amoxicillin 500mg tds"), Instant::now());
        other.save().await?;
        println!("a colleague saved v{}", other.version());
    }

    // Our next save loses the version race. The conflict arrives as a
    // value, never an exception.
    session.set_field(
        "recommendations",
        json!("chest x-ray if not settling"),
        Instant::now(),
    );
    match session.save().await? {
        SaveOutcome::Conflict(info) => {
            println!(
                "conflict: server is at v{} ({}), our write was based on v{}",
                info.server_version, info.last_edited_by, info.your_version
            );
        }
        outcome => println!("expected a conflict, got {outcome:?}"),
    }
    let options = session.resolution_options();
    println!(
        "options: reload={} compare={} amend={} force needs arming={}",
        options.can_reload, options.can_compare, options.can_amend, options.force_requires_arming
    );

    let report = session.compare_with_server().await?;
    println!("compare: {}", report.summary);
    for change in &report.changes {
        println!(
            "  {:<8} {}: {:?} -> {:?}",
            change.kind.as_str(),
            change.field,
            change.old_value,
            change.new_value
        );
    }

    // Take the server copy, then re-apply our recommendation on top.
    session.reload_from_server().await?;
    println!("reloaded v{} [{}]", session.version(), session.status_line());
    session.set_field(
        "recommendations",
        json!("chest x-ray if not settling"),
        Instant::now(),
    );
    session.save().await?;
    println!("saved v{}", session.version());

    // The navigation guard prompts exactly once for unsaved work.
    session.set_field("notes", json!("patient counselled"), Instant::now());
    match session.request_leave() {
        LeaveDecision::Confirm => println!("leave requested: unsaved changes, prompting"),
        decision => println!("leave requested: {decision:?}"),
    }
    let left = session.answer_leave(false);
    println!("clinician chose to stay (navigating={left})");
    session.save().await?;

    // Sign, then record an amendment.
    session.sign().await?;
    println!(
        "signed v{} [{}]",
        session.version(),
        session.lifecycle().as_str()
    );
    session.set_field(
        "recommendations",
        json!("chest x-ray if not settling; return sooner if breathless"),
        Instant::now(),
    );
    let amended = session
        .amend("added safety-netting advice after review")
        .await?;
    println!(
        "amended v{} [{}]",
        amended.version,
        amended.lifecycle.as_str()
    );

    // Read paths: the audit trail and a first-to-latest field diff.
    println!("-- history --");
    let history = session.revisions().history().await?;
    for entry in &history.revisions {
        match &entry.summary {
            Some(summary) => println!(
                "  v{} {} by {} ({summary})",
                entry.version, entry.action, entry.actor
            ),
            None => println!("  v{} {} by {}", entry.version, entry.action, entry.actor),
        }
    }

    println!("-- changes since first save --");
    let full = session.revisions().compare(1, session.version()).await?;
    println!("{}", full.summary);
    for change in &full.changes {
        println!("  {:<8} {}", change.kind.as_str(), change.field);
    }

    Ok(())
}

/// Drives the poll loop with the real clock until the scheduler goes
/// idle or gives up.
async fn pump_autosave<E: RecordEndpoint>(session: &mut DocumentSession<E>) {
    loop {
        match session.poll_autosave(Instant::now()).await {
            AutosaveTick::Idle | AutosaveTick::Skipped => break,
            AutosaveTick::WaitUntil(deadline) => {
                tokio::time::sleep(deadline.saturating_duration_since(Instant::now())).await;
            }
            AutosaveTick::Completed(_) => {}
            AutosaveTick::Failed(err) => {
                tracing::warn!(%err, "autosave attempt failed");
                break;
            }
        }
    }
}
