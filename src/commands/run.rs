//! `naasctl <object> <operation>`: load, log in, plan, push, report

use anyhow::{Context as _, Result, bail};
use portal::{Api, Client, DEFAULT_HOST};
use reconcile::{ConfirmCallback, ExecuteOptions, ProgressCallback, Report};
use serde_json::Value;

use crate::Context;
use crate::cli::{OutputFormat, PortalArgs, RunArgs};
use crate::document;
use crate::objects::{ObjectKind, ObjectPlanner, Operation, PlanContext};
use crate::pusher::PortalPusher;
use crate::settings::Settings;
use crate::ui;

pub fn run(ctx: &Context, portal: &PortalArgs, kind: ObjectKind, args: &RunArgs) -> Result<()> {
    let operation = args.operation;
    if !kind.supports(operation) {
        let supported: Vec<String> = kind.operations().iter().map(ToString::to_string).collect();
        bail!(
            "{} do not support '{operation}' (supported: {})",
            kind.name(),
            supported.join(", ")
        );
    }

    let settings = settings(portal)?;
    let path = settings.resolve_document(&args.file);
    let document = document::load(&path)?;

    let client = connect(portal, &settings)?;
    let opts = ExecuteOptions {
        dry_run: args.dry_run,
        jobs: resolve_jobs(args.jobs, &settings),
    };
    log::info!(
        "{} {operation} from {} ({} job(s){})",
        kind.name(),
        path.display(),
        opts.jobs,
        if opts.dry_run { ", dry run" } else { "" }
    );

    let text = ctx.format == OutputFormat::Text;
    let mut progress = ui::Progress::new(text && !ctx.quiet, args.diff);
    let mut prompt = ui::Prompt::new(args.yes);
    let report = reconcile_document(
        &client,
        kind,
        operation,
        document,
        &opts,
        &mut progress,
        &mut prompt,
    )?;

    match ctx.format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&report)?),
        OutputFormat::Text => {
            ui::print_report(&format!("{} {operation}", kind.name()), &report);
            if ctx.verbose > 0 {
                ui::print_targets(&report);
            }
            if report.outcome.failed && report.errors().is_empty() {
                ui::warn(&format!(
                    "Not removed, still in use: {}",
                    report.outcome.failed_objects.join(", ")
                ));
            }
        }
    }

    report.into_result()?;
    Ok(())
}

/// Plan and push an already loaded document
pub fn reconcile_document<G, C>(
    api: &dyn Api,
    kind: ObjectKind,
    operation: Operation,
    document: Value,
    opts: &ExecuteOptions,
    progress: &mut G,
    confirm: &mut C,
) -> reconcile::Result<Report>
where
    G: ProgressCallback,
    C: ConfirmCallback,
{
    let planner = ObjectPlanner::new(PlanContext::new(api, opts.jobs), kind, operation);
    reconcile::reconcile(
        move || Ok(document),
        &planner,
        &PortalPusher::new(api),
        opts,
        progress,
        confirm,
    )
}

/// Settings file with `--config-path` applied
fn settings(portal: &PortalArgs) -> Result<Settings> {
    let mut settings = Settings::load()?;
    if let Some(path) = &portal.config_path {
        settings.config_path = Some(path.to_string_lossy().into_owned());
    }
    Ok(settings)
}

fn connect(portal: &PortalArgs, settings: &Settings) -> Result<Client> {
    let host = portal
        .host
        .as_deref()
        .or(settings.host.as_deref())
        .unwrap_or(DEFAULT_HOST);
    let username = portal
        .username
        .as_deref()
        .or(settings.username.as_deref())
        .context("No portal username: pass --username or set GRAPHIANT_USERNAME")?;
    let password = portal
        .password
        .as_deref()
        .context("No portal password: pass --password or set GRAPHIANT_PASSWORD")?;

    log::info!("Logging in to {host} as {username}");
    Client::new(host)
        .login(username, password)
        .with_context(|| format!("Could not log in to {host}"))
}

/// `--jobs`, then the settings file, then the engine default; never zero
fn resolve_jobs(flag: Option<usize>, settings: &Settings) -> usize {
    flag.or(settings.jobs)
        .unwrap_or_else(|| ExecuteOptions::default().jobs)
        .max(1)
}
