//! titan-server/src/server.rs
//!
//! Runs the process: load state, start the tracking job, handle one request
//! or wait for Ctrl-C, then shut down through the persistence coordinator.

use std::str::FromStr;
use anyhow::Context;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use titan_common::models::{
    ActionKind, ActionRequest, CommendInfo, MatchShareCode, ReportInfo, SteamId,
};
use titan_common::traits::{JobScheduler, Trigger};
use titan_core::eventbus::notifier::spawn_notification_logger;
use titan_core::orchestrator::{AccountResult, OrchestrationResult};
use titan_core::Error;

use crate::context::ServerContext;
use crate::{Args, Command, CommendArgs, IdleArgs, ReportArgs};

pub async fn run_server(args: Args) -> anyhow::Result<()> {
    // 1) everything that can make startup fatal
    let ctx = ServerContext::new(&args).await.context("startup failed")?;
    let notifier = spawn_notification_logger(&ctx.event_bus).await;
    info!(
        "{} account(s) loaded, {} previously targeted player(s) on record.",
        ctx.pool.len(),
        ctx.victims.len()
    );

    // 2) restriction list; a failure leaves the guard blocking every target
    match ctx.guard.refresh().await {
        Ok(n) => info!("Blacklist loaded with {} entr(ies).", n),
        Err(e) => warn!("Blacklist unavailable, all targets are blocked: {}", e),
    }

    // 3) background tracking
    let trigger = Trigger::every(ctx.tracking_config.interval);
    match ctx.scheduler.register(ctx.tracking_job.clone(), trigger).await {
        Ok(id) => info!("Victim tracking registered as job {} (every {:?}).", id, ctx.tracking_config.interval),
        Err(e) => error!("Could not register victim tracking: {}", e),
    }
    if let Err(e) = ctx.scheduler.start().await {
        error!("Could not start the scheduler: {}", e);
    }

    // 4) Ctrl-C cancels whatever is running
    let ctrlc = spawn_ctrl_c_watcher(ctx.shutdown_token.clone());

    // 5) one request, or run until asked to stop
    match &args.command {
        Some(command) => {
            // a running submit is not interrupted; Ctrl-C only stops what comes after it
            run_command(&ctx, command).await;
            if let Err(e) = ctx.coordinator.checkpoint().await {
                warn!("Checkpoint failed: {}", e);
            }
        }
        None => {
            info!("No command given; running until Ctrl-C.");
            ctx.shutdown_token.cancelled().await;
        }
    }

    // 6) ordered shutdown
    let report = ctx.coordinator.shutdown().await;
    if report.is_clean() {
        info!(
            "Shutdown completed cleanly ({} step(s), index written {} time(s)).",
            report.completed.len(),
            report.index_flushes
        );
    } else {
        error!("Shutdown finished with {} failed step(s); some state may not be on disk.", report.failures.len());
    }

    ctrlc.abort();
    let _ = notifier.await;
    Ok(())
}

fn spawn_ctrl_c_watcher(token: CancellationToken) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        tokio::select! {
            res = tokio::signal::ctrl_c() => {
                match res {
                    Ok(()) => info!("Ctrl-C received; shutting down."),
                    Err(e) => error!("Error waiting for Ctrl-C: {:?}", e),
                }
                token.cancel();
            }
            _ = token.cancelled() => {}
        }
    })
}

async fn run_command(ctx: &ServerContext, command: &Command) {
    let request = match build_request(command) {
        Ok(Some(request)) => request,
        Ok(None) => {
            if let Command::Check { target } = command {
                check_target(ctx, target);
            }
            return;
        }
        Err(Error::UnsupportedAction(what)) => {
            warn!("{} is not supported yet; nothing was sent.", what);
            return;
        }
        Err(e) => {
            error!("{}", e);
            return;
        }
    };

    let target = request.target;
    let kind = request.kind();
    match ctx.orchestrator.submit(request).await {
        Ok(OrchestrationResult::Blocked { target }) => {
            warn!("{} is blacklisted; nothing was sent.", target);
        }
        Ok(OrchestrationResult::Completed(summary)) => {
            for execution in &summary.executions {
                match &execution.result {
                    AccountResult::Succeeded => info!("  {}: ok", execution.username),
                    AccountResult::Failed { reason } => warn!("  {}: {}", execution.username, reason),
                    AccountResult::TimedOut => warn!("  {}: timed out", execution.username),
                }
            }
            info!(
                "{} {}: {} succeeded, {} failed, {} skipped.",
                kind, target, summary.succeeded, summary.failed, summary.skipped
            );
        }
        Err(Error::UnsupportedAction(what)) => warn!("{} is not supported yet.", what),
        Err(e) => error!("{} {} failed: {}", kind, target, e),
    }
}

/// Turns a subcommand into a request. `Ok(None)` for commands that do not
/// submit anything. Idling has no target to check, so it is refused here
/// instead of being passed through the blacklist.
fn build_request(command: &Command) -> Result<Option<ActionRequest>, Error> {
    let request = match command {
        Command::Report(report) => report_request(report)?,
        Command::Commend(commend) => commend_request(commend)?,
        Command::Idle(IdleArgs { app_ids }) => {
            debug!("Idle requested for app(s) {:?}.", app_ids);
            return Err(Error::UnsupportedAction(ActionKind::Idle.to_string()));
        }
        Command::Check { .. } => return Ok(None),
    };
    Ok(Some(request))
}

fn report_request(args: &ReportArgs) -> Result<ActionRequest, Error> {
    let target = SteamId::from_str(&args.target)?;
    let share_code = args
        .match_code
        .as_deref()
        .map(MatchShareCode::from_str)
        .transpose()?;
    let info = ReportInfo {
        abusive_text: args.abusive_text,
        abusive_voice: args.abusive_voice,
        griefing: args.griefing,
        aim_hacking: args.aim_hacking,
        wall_hacking: args.wall_hacking,
        other_hacking: args.other_hacking,
        share_code,
    };
    if !info.has_category() {
        warn!("No report category selected for {}.", target);
    }
    let request = ActionRequest::report(target, info);
    Ok(match args.accounts {
        Some(n) => request.with_max_accounts(n),
        None => request,
    })
}

fn commend_request(args: &CommendArgs) -> Result<ActionRequest, Error> {
    let target = SteamId::from_str(&args.target)?;
    let info = CommendInfo {
        friendly: args.friendly,
        leader: args.leader,
        teacher: args.teacher,
    };
    let request = ActionRequest::commend(target, info);
    Ok(match args.accounts {
        Some(n) => request.with_max_accounts(n),
        None => request,
    })
}

fn check_target(ctx: &ServerContext, raw: &str) {
    let target = match SteamId::from_str(raw) {
        Ok(id) => id,
        Err(e) => {
            if ctx.guard.is_restricted_raw(raw) {
                warn!("'{}' is blacklisted.", raw);
            } else {
                error!("{}", e);
            }
            return;
        }
    };
    if ctx.orchestrator.is_restricted(&target) {
        warn!("{} ({}) is blacklisted.", target, target.steam3());
    } else {
        info!("{} ({}) may be targeted.", target, target.steam3());
    }
    match ctx.orchestrator.victim_record(&target) {
        Some(record) => info!(
            "Targeted {} time(s), last on {}{}.",
            record.visits,
            record.last_acted.format("%Y-%m-%d %H:%M"),
            if record.banned { ", now banned" } else { "" }
        ),
        None => info!("Never targeted before."),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use titan_common::models::Action;

    fn parse(argv: &[&str]) -> Args {
        Args::try_parse_from(argv).unwrap()
    }

    #[test]
    fn report_flags_become_a_request() {
        let args = parse(&[
            "titan", "--dummy", "report", "76561197960287930", "--aim-hacking", "--accounts", "3",
        ]);
        let request = build_request(args.command.as_ref().unwrap()).unwrap().unwrap();
        assert_eq!(request.target.as_u64(), 76561197960287930);
        assert_eq!(request.max_accounts, Some(3));
        match request.action {
            Action::Report(info) => {
                assert!(info.aim_hacking);
                assert!(!info.griefing);
                assert!(info.share_code.is_none());
            }
            other => panic!("expected a report, got {:?}", other),
        }
    }

    #[test]
    fn commend_accepts_steam2_ids() {
        let args = parse(&["titan", "commend", "STEAM_0:0:11101", "--leader"]);
        let request = build_request(args.command.as_ref().unwrap()).unwrap().unwrap();
        assert_eq!(request.target.as_u64(), 76561197960287930);
        assert_eq!(request.max_accounts, None);
        assert!(matches!(request.action, Action::Commend(CommendInfo { leader: true, .. })));
    }

    #[test]
    fn bad_target_is_rejected_before_submission() {
        let args = parse(&["titan", "report", "not-a-player"]);
        assert!(matches!(build_request(args.command.as_ref().unwrap()), Err(Error::Parse(_))));
    }

    #[test]
    fn zero_accounts_is_rejected_by_the_parser() {
        assert!(Args::try_parse_from(["titan", "commend", "76561197960287930", "--accounts", "0"]).is_err());
        assert!(Args::try_parse_from(["titan", "report", "76561197960287930", "--accounts", "0"]).is_err());
        let args = parse(&["titan", "commend", "76561197960287930", "--accounts", "1"]);
        let request = build_request(args.command.as_ref().unwrap()).unwrap().unwrap();
        assert_eq!(request.max_accounts, Some(1));
    }

    #[test]
    fn idle_is_refused_without_a_target() {
        let args = parse(&["titan", "idle", "--game", "440"]);
        match build_request(args.command.as_ref().unwrap()) {
            Err(Error::UnsupportedAction(what)) => assert_eq!(what, ActionKind::Idle.to_string()),
            other => panic!("expected idle to be unsupported, got {:?}", other),
        }
    }

    #[test]
    fn check_submits_nothing() {
        let args = parse(&["titan", "check", "76561197960287930"]);
        assert!(build_request(args.command.as_ref().unwrap()).unwrap().is_none());
    }

    #[test]
    fn defaults_match_documented_values() {
        let args = parse(&["titan"]);
        assert!(args.command.is_none());
        assert!(!args.noblacklist);
        assert_eq!(args.action_timeout_secs, 30);
        assert_eq!(args.cooldown_mins, 30);
        assert_eq!(args.tracking_interval_mins, 15);
        assert_eq!(args.accounts_file.to_str(), Some("accounts.json"));
    }
}
