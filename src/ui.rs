use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use reconcile::{ConfirmCallback, Outcome, PatchObject, ProgressCallback, Report, Target};
use serde_json::Value;
use similar::{ChangeTag, TextDiff};
use std::io;

/// Print a warning message
pub fn warn(msg: &str) {
    println!("{} {}", "⚠".yellow(), msg);
}

/// Print a dim/muted message
pub fn dim(msg: &str) {
    println!("  {}", msg.dimmed());
}

/// Print a header/title
pub fn header(title: &str) {
    println!();
    println!("{}", title.bold());
    println!("{}", "─".repeat(title.chars().count()).dimmed());
}

/// Print a section header
pub fn section(title: &str) {
    println!();
    println!("{}", title.cyan().bold());
}

/// Print a key-value pair
pub fn kv(key: &str, value: &str) {
    println!("  {}: {}", key.dimmed(), value);
}

// ============================================================================
// Progress
// ============================================================================

fn bar_style() -> ProgressStyle {
    ProgressStyle::default_bar()
        .template("{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} {msg}")
        .map_or_else(|_| ProgressStyle::default_bar(), |style| style.progress_chars("=>-"))
}

/// Terminal progress: a bar per phase, optional diffs of planned updates
pub struct Progress {
    enabled: bool,
    show_diff: bool,
    bar: Option<ProgressBar>,
}

impl Progress {
    pub fn new(enabled: bool, show_diff: bool) -> Self {
        Self {
            enabled,
            show_diff,
            bar: None,
        }
    }

    fn println(&self, line: String) {
        match &self.bar {
            Some(bar) => bar.println(line),
            None => println!("{line}"),
        }
    }
}

impl ProgressCallback for Progress {
    fn on_plan(&mut self, updates: &[(&Target, &PatchObject)]) {
        if !self.enabled || updates.is_empty() {
            return;
        }
        let targets = updates
            .iter()
            .map(|(target, _)| &target.name)
            .collect::<std::collections::BTreeSet<_>>()
            .len();
        section(&format!(
            "Plan: {} change(s) on {} target(s)",
            updates.len(),
            targets
        ));
        for (target, object) in updates {
            println!(
                "  {} {} {}",
                change_symbol(object),
                object.name,
                format!("({target}, {:?})", object.change).dimmed()
            );
            if self.show_diff {
                print_diff(object.before.as_ref(), object.after.as_ref());
            }
        }
        println!();
    }

    fn on_phase_start(&mut self, phase: &str, targets: usize) {
        if !self.enabled {
            return;
        }
        let bar = ProgressBar::new(targets as u64);
        bar.set_style(bar_style());
        bar.set_message(phase.to_string());
        self.bar = Some(bar);
    }

    fn on_target_complete(&mut self, target: &Target, outcome: &Outcome, error: Option<&str>) {
        if !self.enabled {
            return;
        }
        let line = match error {
            Some(error) => format!("  {} {target}: {error}", "✗".red()),
            None if outcome.failed => format!(
                "  {} {target}: in use: {}",
                "⊘".yellow(),
                outcome.failed_objects.join(", ")
            ),
            None if outcome.changed => format!("  {} {target}", "✓".green()),
            None => format!("  {} {target}", "○".dimmed()),
        };
        self.println(line);
        if let Some(bar) = &self.bar {
            bar.inc(1);
        }
    }

    fn on_phase_complete(&mut self, phase: &str) {
        if let Some(bar) = self.bar.take() {
            bar.finish_and_clear();
        }
        if self.enabled {
            log::info!("Phase '{phase}' complete");
        }
    }
}

fn change_symbol(object: &PatchObject) -> colored::ColoredString {
    use reconcile::ChangeKind;
    match object.change {
        ChangeKind::Created | ChangeKind::Attached => "+".green(),
        ChangeKind::Deleted | ChangeKind::Detached => "-".red(),
        ChangeKind::Updated => "~".yellow(),
    }
}

// ============================================================================
// Confirmation
// ============================================================================

/// Asks before pushing, unless `--yes` was given or stdout is not a terminal
pub struct Prompt {
    assume_yes: bool,
}

impl Prompt {
    pub fn new(assume_yes: bool) -> Self {
        Self { assume_yes }
    }
}

impl ConfirmCallback for Prompt {
    fn confirm(&mut self, prompt: &str) -> io::Result<bool> {
        if self.assume_yes || !console::Term::stdout().is_term() {
            return Ok(true);
        }
        dialoguer::Confirm::new()
            .with_prompt(prompt)
            .default(true)
            .interact()
            .map_err(|e| io::Error::other(e.to_string()))
    }
}

// ============================================================================
// Diff
// ============================================================================

/// Removed and added lines between two pretty-printed documents
pub fn changed_lines(before: Option<&Value>, after: Option<&Value>) -> Vec<(ChangeTag, String)> {
    let pretty = |value: Option<&Value>| {
        value
            .map(|v| serde_json::to_string_pretty(v).unwrap_or_default())
            .unwrap_or_default()
    };
    let (old, new) = (pretty(before), pretty(after));
    TextDiff::from_lines(&old, &new)
        .iter_all_changes()
        .filter(|change| change.tag() != ChangeTag::Equal)
        .map(|change| (change.tag(), change.value().trim_end().to_string()))
        .collect()
}

fn print_diff(before: Option<&Value>, after: Option<&Value>) {
    for (tag, line) in changed_lines(before, after) {
        match tag {
            ChangeTag::Delete => println!("      {}", format!("- {line}").red()),
            ChangeTag::Insert => println!("      {}", format!("+ {line}").green()),
            ChangeTag::Equal => {}
        }
    }
}

// ============================================================================
// Report
// ============================================================================

/// Non-empty outcome lists with their labels, in display order
pub fn outcome_lists(outcome: &Outcome) -> Vec<(&'static str, &[String])> {
    [
        ("created", outcome.created.as_slice()),
        ("updated", outcome.updated.as_slice()),
        ("deleted", outcome.deleted.as_slice()),
        ("attached", outcome.attached.as_slice()),
        ("detached", outcome.detached.as_slice()),
        ("skipped", outcome.skipped.as_slice()),
        ("in use", outcome.failed_objects.as_slice()),
        ("unchanged", outcome.unchanged.as_slice()),
    ]
    .into_iter()
    .filter(|(_, names)| !names.is_empty())
    .collect()
}

/// Print a run's report
pub fn print_report(title: &str, report: &Report) {
    header(title);
    if report.declined {
        warn("Declined, nothing was pushed");
        return;
    }

    let outcome = &report.outcome;
    let errors = report.errors();
    println!();
    if !errors.is_empty() {
        println!("  {} Completed with errors", "✗".red().bold());
    } else if outcome.failed {
        println!("  {} Completed, some objects are in use", "⚠".yellow().bold());
    } else if outcome.changed {
        println!("  {} Configuration applied", "✓".green().bold());
    } else {
        println!("  {} Nothing to change", "✓".green().bold());
    }

    for (label, names) in outcome_lists(outcome) {
        let heading = format!("{label} ({})", names.len());
        let heading = match label {
            "in use" => heading.red(),
            "skipped" | "unchanged" => heading.dimmed(),
            _ => heading.normal(),
        };
        println!("    • {heading}: {}", names.join(", "));
    }

    let halted: Vec<_> = report
        .targets
        .iter()
        .filter(|(_, t)| t.error.is_none())
        .filter_map(|(name, t)| t.halted_at.as_ref().map(|phase| (name, phase)))
        .collect();
    if !halted.is_empty() || !errors.is_empty() {
        section("Targets");
        for (name, phase) in halted {
            println!("  {} {name}: stopped at {phase}", "⊘".yellow());
        }
        for error in &errors {
            println!("  {} {error}", "✗".red());
        }
    }

    if report.dry_run {
        println!();
        dim("Dry run: nothing was pushed");
    }
}

/// Print the phases each target went through
pub fn print_targets(report: &Report) {
    section("Phases by target");
    for (name, target) in &report.targets {
        let phases = if target.phases_completed.is_empty() {
            "none".to_string()
        } else {
            target.phases_completed.join(" → ")
        };
        kv(name, &phases);
        if let Some(phase) = &target.halted_at {
            dim(&format!("  stopped at {phase}"));
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
