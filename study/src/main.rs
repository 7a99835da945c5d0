use std::{
    fs,
    io::Write,
    path::{Path, PathBuf},
    thread,
    time::Duration,
};

use anyhow::{Context, Result};
use chrono::{Local, NaiveDate, Utc};
use clap::{Args, Parser, Subcommand, ValueEnum};
use study::config::StudyConfig;
use study::progress::{self, ProgressSnapshot};
use study::state::{DeadlineStatus, Goal, GoalDraft, Priority};
use study::streak::StudySession;
use study::timer::{Chime, Phase, SessionLength, SilentChime, TerminalBell, TickOutcome};
use study::{JsonFileStore, StoreKeys, StudyTracker, Timer, TimerEvent};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(
    name = "study",
    about = "Track exam topics, notes, goals and focus sessions",
    version
)]
struct Cli {
    /// Enable verbose logging for debugging.
    #[arg(long, global = true)]
    verbose: bool,
    /// Config file to read instead of the platform default.
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Store file; overrides `store_path` from the config.
    #[arg(long, global = true)]
    store: Option<PathBuf>,
    /// Topic catalogue (TOML); overrides `catalog_path` from the config.
    #[arg(long, global = true)]
    catalog: Option<PathBuf>,
    /// Key prefix inside the store; overrides `namespace` from the config.
    #[arg(long, global = true)]
    namespace: Option<String>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Show overall progress and study statistics.
    Status(JsonArgs),

    /// Show per-section progress (best first) and unlocked achievements.
    Dashboard(JsonArgs),

    /// List topics with their completion state.
    List(ListArgs),

    /// Mark topics as done.
    Check(ItemArgs),

    /// Mark topics as not done.
    Uncheck(ItemArgs),

    /// Flip the completion state of topics.
    Toggle(ItemArgs),

    /// Read or edit per-topic notes.
    #[command(subcommand)]
    Note(NoteCommand),

    /// Manage study goals.
    #[command(subcommand)]
    Goal(GoalCommand),

    /// Run focus/break cycles in the foreground.
    Timer(TimerArgs),

    /// Write the progress report as JSON.
    Export(ExportArgs),

    /// Show or change the dark-mode preference.
    Theme(ThemeArgs),

    /// Clear every completion mark.
    Reset(ResetArgs),
}

#[derive(Debug, Args)]
struct JsonArgs {
    /// Emit JSON instead of text.
    #[arg(long)]
    json: bool,
}

#[derive(Debug, Args)]
struct ListArgs {
    /// Only show topics whose text contains this (case-insensitive).
    #[arg(long)]
    search: Option<String>,
    /// Only show this section id.
    #[arg(long)]
    section: Option<String>,
    /// Emit JSON instead of text.
    #[arg(long)]
    json: bool,
}

#[derive(Debug, Args)]
struct ItemArgs {
    /// Topic ids.
    #[arg(required = true)]
    ids: Vec<String>,
}

#[derive(Debug, Subcommand)]
enum NoteCommand {
    /// Print the note for a topic.
    Show { id: String },
    /// Replace the note for a topic; blank text removes it.
    Set {
        id: String,
        #[arg(required = true, num_args = 1..)]
        text: Vec<String>,
    },
    /// Remove the note for a topic.
    Delete { id: String },
    /// Print every stored note.
    List,
}

#[derive(Debug, Subcommand)]
enum GoalCommand {
    /// Show active and completed goals.
    List(JsonArgs),
    /// Add a goal.
    Add(GoalAddArgs),
    /// Change fields of an existing goal.
    Edit(GoalEditArgs),
    /// Remove a goal.
    Delete { id: String },
}

#[derive(Debug, Args)]
struct GoalAddArgs {
    #[arg(long)]
    title: String,
    #[arg(long, default_value = "")]
    description: String,
    /// Target date (YYYY-MM-DD).
    #[arg(long)]
    date: String,
    /// Number of completed topics that satisfies the goal.
    #[arg(long)]
    topics: String,
    /// low, medium or high.
    #[arg(long, default_value = "medium")]
    priority: Priority,
}

#[derive(Debug, Args)]
struct GoalEditArgs {
    id: String,
    #[arg(long)]
    title: Option<String>,
    #[arg(long)]
    description: Option<String>,
    #[arg(long)]
    date: Option<String>,
    #[arg(long)]
    topics: Option<String>,
    #[arg(long)]
    priority: Option<Priority>,
}

#[derive(Debug, Args)]
struct TimerArgs {
    /// Focus length in minutes (25, 45 or 60). Defaults to the configured length.
    #[arg(long, value_parser = parse_session_length)]
    length: Option<SessionLength>,
    /// Number of focus+break cycles to run.
    #[arg(long, default_value_t = 1)]
    cycles: u32,
    /// Do not ring the terminal bell at phase ends.
    #[arg(long)]
    quiet: bool,
    /// Emit timer events as JSON lines instead of a countdown.
    #[arg(long)]
    json: bool,
    /// Wall-clock milliseconds per timer second.
    #[arg(long, default_value_t = 1000, hide = true)]
    tick_ms: u64,
}

#[derive(Debug, Args)]
struct ExportArgs {
    /// Output path. Defaults to `<namespace>-study-progress-YYYY-MM-DD.json` in the current directory.
    #[arg(long)]
    output: Option<PathBuf>,
    /// Print the report instead of writing a file.
    #[arg(long, conflicts_with = "output")]
    stdout: bool,
}

#[derive(Debug, Args)]
struct ThemeArgs {
    #[arg(value_enum)]
    mode: Option<ThemeMode>,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
enum ThemeMode {
    Dark,
    Light,
    Toggle,
}

#[derive(Debug, Args)]
struct ResetArgs {
    /// Confirm clearing all completion marks.
    #[arg(long)]
    yes: bool,
}

fn main() -> Result<()> {
    let Cli {
        verbose,
        config,
        store,
        catalog,
        namespace,
        command,
    } = Cli::parse();
    init_tracing(verbose);

    let mut config = load_config(config.as_deref())?;
    apply_overrides(&mut config, store, catalog, namespace);

    match command {
        Commands::Status(args) => handle_status(args, &config),
        Commands::Dashboard(args) => handle_dashboard(args, &config),
        Commands::List(args) => handle_list(args, &config),
        Commands::Check(args) => handle_mark(args, &config, Mark::Done),
        Commands::Uncheck(args) => handle_mark(args, &config, Mark::NotDone),
        Commands::Toggle(args) => handle_mark(args, &config, Mark::Toggle),
        Commands::Note(cmd) => handle_note(cmd, &config),
        Commands::Goal(cmd) => handle_goal(cmd, &config),
        Commands::Timer(args) => handle_timer(args, &config),
        Commands::Export(args) => handle_export(args, &config),
        Commands::Theme(args) => handle_theme(args, &config),
        Commands::Reset(args) => handle_reset(args, &config),
    }
}

fn init_tracing(verbose: bool) {
    let fallback = if verbose { "study=debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback)),
        )
        .with_writer(std::io::stderr)
        .init();
}

fn load_config(explicit: Option<&Path>) -> Result<StudyConfig> {
    match explicit {
        Some(path) => {
            if !path.exists() {
                anyhow::bail!("config file {:?} does not exist", path);
            }
            StudyConfig::load(path).with_context(|| format!("loading config {:?}", path))
        }
        None => StudyConfig::load_default().context("loading default config"),
    }
}

fn apply_overrides(
    config: &mut StudyConfig,
    store: Option<PathBuf>,
    catalog: Option<PathBuf>,
    namespace: Option<String>,
) {
    if let Some(store) = store {
        config.store_path = Some(store);
    }
    if let Some(catalog) = catalog {
        config.catalog_path = Some(catalog);
    }
    if let Some(namespace) = namespace {
        config.namespace = namespace;
    }
}

fn open_tracker(config: &StudyConfig) -> Result<StudyTracker<JsonFileStore>> {
    let tree = config.load_catalog().context("loading topic catalogue")?;
    let path = config.store_path()?;
    let store =
        JsonFileStore::open(&path).with_context(|| format!("opening store {:?}", path))?;
    Ok(StudyTracker::open(
        tree,
        store,
        StoreKeys::new(config.namespace.clone()),
        config.streak_policy.policy(),
    ))
}

fn handle_status(args: JsonArgs, config: &StudyConfig) -> Result<()> {
    let JsonArgs { json } = args;
    let tracker = open_tracker(config)?;
    let snapshot = tracker.snapshot();
    let notes = tracker.notes_count();

    if json {
        #[derive(serde::Serialize)]
        struct StatusOutput<'a> {
            #[serde(flatten)]
            snapshot: &'a ProgressSnapshot,
            notes: usize,
            message: &'static str,
        }

        let payload = StatusOutput {
            snapshot: &snapshot,
            notes,
            message: progress::motivational_message(snapshot.overall_progress),
        };
        println!("{}", serde_json::to_string_pretty(&payload)?);
        return Ok(());
    }

    println!(
        "Overall progress: {}% ({}/{})  {}",
        snapshot.overall_progress,
        snapshot.completed_items,
        snapshot.total_items,
        progress::motivational_message(snapshot.overall_progress)
    );
    println!("{}", progress_bar(snapshot.overall_progress, 40));
    println!("Study streak:        {}", snapshot.study_streak);
    println!(
        "Study time:          {}",
        progress::format_study_time(snapshot.total_study_minutes)
    );
    match snapshot.average_session_minutes {
        Some(avg) => println!("Average session:     {avg}m"),
        None => println!("Average session:     -"),
    }
    println!(
        "Estimated remaining: {}",
        progress::format_study_time(snapshot.estimated_time_remaining_minutes)
    );
    println!("Notes:               {notes}");
    Ok(())
}

fn handle_dashboard(args: JsonArgs, config: &StudyConfig) -> Result<()> {
    let JsonArgs { json } = args;
    let tracker = open_tracker(config)?;
    let ranked = progress::ranked_sections(tracker.tree(), tracker.completion());
    let snapshot = tracker.snapshot();

    if json {
        #[derive(serde::Serialize)]
        struct DashboardOutput<'a> {
            sections: &'a [progress::SectionProgress],
            achievements: &'a [&'static progress::Achievement],
        }

        let payload = DashboardOutput {
            sections: &ranked,
            achievements: &snapshot.achievements,
        };
        println!("{}", serde_json::to_string_pretty(&payload)?);
        return Ok(());
    }

    println!("Section progress");
    for section in &ranked {
        println!(
            "  {} {:>3}%  {:>2}/{:<2}  {}",
            progress_bar(section.percent, 20),
            section.percent,
            section.completed,
            section.total,
            section.title
        );
    }
    println!();
    if snapshot.achievements.is_empty() {
        println!("No achievements yet.");
    } else {
        println!("Achievements");
        for achievement in &snapshot.achievements {
            println!(
                "  {} {}: {}",
                achievement.icon, achievement.name, achievement.description
            );
        }
    }
    Ok(())
}

fn handle_list(args: ListArgs, config: &StudyConfig) -> Result<()> {
    let ListArgs {
        search,
        section,
        json,
    } = args;
    let tracker = open_tracker(config)?;

    let mut sections = match search.as_deref() {
        Some(term) => tracker.tree().filter(term),
        None => tracker.tree().sections().to_vec(),
    };
    if let Some(wanted) = section.as_deref() {
        if tracker.tree().section(wanted).is_none() {
            anyhow::bail!("no section with id {:?}", wanted);
        }
        sections.retain(|s| s.id == wanted);
    }

    if json {
        #[derive(serde::Serialize)]
        struct ItemOutput<'a> {
            id: &'a str,
            text: &'a str,
            completed: bool,
            has_note: bool,
        }

        #[derive(serde::Serialize)]
        struct SectionOutput<'a> {
            id: &'a str,
            title: &'a str,
            items: Vec<ItemOutput<'a>>,
        }

        let payload: Vec<SectionOutput<'_>> = sections
            .iter()
            .map(|s| SectionOutput {
                id: &s.id,
                title: &s.title,
                items: s
                    .items
                    .iter()
                    .map(|item| ItemOutput {
                        id: &item.id,
                        text: &item.text,
                        completed: tracker.completion().is_completed(&item.id),
                        has_note: tracker.has_note(&item.id),
                    })
                    .collect(),
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&payload)?);
        return Ok(());
    }

    if sections.is_empty() {
        println!("No matching topics.");
        return Ok(());
    }
    for (idx, section) in sections.iter().enumerate() {
        // Counts always come from the full section, not the filtered view.
        let full = tracker
            .tree()
            .section(&section.id)
            .map(|s| progress::section_progress(s, tracker.completion()));
        match full {
            Some(p) => println!("== {} ({}/{}, {}%) ==", section.title, p.completed, p.total, p.percent),
            None => println!("== {} ==", section.title),
        }
        for item in &section.items {
            let mark = if tracker.completion().is_completed(&item.id) {
                "x"
            } else {
                " "
            };
            let note = if tracker.has_note(&item.id) { " [note]" } else { "" };
            println!("  [{mark}] {:<28} {}{note}", item.id, item.text);
        }
        if idx + 1 < sections.len() {
            println!();
        }
    }
    Ok(())
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum Mark {
    Done,
    NotDone,
    Toggle,
}

fn handle_mark(args: ItemArgs, config: &StudyConfig, mark: Mark) -> Result<()> {
    let ItemArgs { ids } = args;
    let mut tracker = open_tracker(config)?;
    for id in &ids {
        let done = match mark {
            Mark::Done => {
                tracker
                    .set_completed(id, true)
                    .with_context(|| format!("checking {:?}", id))?;
                true
            }
            Mark::NotDone => {
                tracker
                    .set_completed(id, false)
                    .with_context(|| format!("unchecking {:?}", id))?;
                false
            }
            Mark::Toggle => tracker
                .toggle(id)
                .with_context(|| format!("toggling {:?}", id))?,
        };
        let text = tracker
            .tree()
            .item(id)
            .map(|item| item.text.as_str())
            .unwrap_or_default();
        println!("[{}] {text}", if done { "x" } else { " " });
    }
    let snapshot = tracker.snapshot();
    println!(
        "Overall progress: {}% ({}/{})",
        snapshot.overall_progress, snapshot.completed_items, snapshot.total_items
    );
    Ok(())
}

fn handle_note(cmd: NoteCommand, config: &StudyConfig) -> Result<()> {
    let mut tracker = open_tracker(config)?;
    match cmd {
        NoteCommand::Show { id } => {
            if !tracker.tree().contains_item(&id) {
                anyhow::bail!("no topic with id {:?}", id);
            }
            match tracker.note(&id) {
                Some(text) => println!("{text}"),
                None => println!("No note for {id}."),
            }
        }
        NoteCommand::Set { id, text } => {
            let text = text.join(" ");
            match tracker
                .save_note(&id, &text)
                .with_context(|| format!("saving note for {:?}", id))?
            {
                Some(_) => println!("Saved note for {id}."),
                None => println!("Note for {id} was blank and has been removed."),
            }
        }
        NoteCommand::Delete { id } => {
            tracker
                .delete_note(&id)
                .with_context(|| format!("deleting note for {:?}", id))?;
            println!("Deleted note for {id}.");
        }
        NoteCommand::List => {
            let notes = tracker.notes();
            if notes.is_empty() {
                println!("No notes.");
            }
            for (id, text) in notes {
                let label = tracker
                    .tree()
                    .item(&id)
                    .map(|item| item.text.as_str())
                    .unwrap_or("(not in catalogue)");
                println!("{id} ({label})");
                for line in text.lines() {
                    println!("    {line}");
                }
            }
        }
    }
    Ok(())
}

fn handle_goal(cmd: GoalCommand, config: &StudyConfig) -> Result<()> {
    let mut tracker = open_tracker(config)?;
    match cmd {
        GoalCommand::List(JsonArgs { json }) => {
            let goals = tracker.goals();
            if json {
                println!("{}", serde_json::to_string_pretty(goals.goals())?);
                return Ok(());
            }
            let today = Local::now().date_naive();
            let active: Vec<&Goal> = goals.active().collect();
            let achieved: Vec<&Goal> = goals.achieved().collect();
            if active.is_empty() && achieved.is_empty() {
                println!("No goals yet.");
                return Ok(());
            }
            if !active.is_empty() {
                println!("Active goals");
                for goal in active {
                    print_goal(goal, today);
                }
            }
            if !achieved.is_empty() {
                println!("Completed goals");
                for goal in achieved {
                    print_goal(goal, today);
                }
            }
        }
        GoalCommand::Add(args) => {
            let GoalAddArgs {
                title,
                description,
                date,
                topics,
                priority,
            } = args;
            let draft = GoalDraft {
                title,
                description,
                target_date: date,
                target_topics: topics,
                priority,
            };
            let goal = tracker
                .create_goal(&draft, Utc::now())
                .context("creating goal")?;
            println!("Created goal {}.", goal.id);
        }
        GoalCommand::Edit(args) => {
            let existing = tracker
                .goals()
                .get(&args.id)
                .cloned()
                .with_context(|| format!("no goal with id {:?}", args.id))?;
            let draft = merged_draft(&existing, &args);
            let goal = tracker
                .update_goal(&existing.id, &draft)
                .with_context(|| format!("updating goal {:?}", existing.id))?;
            println!("Updated goal {}.", goal.id);
        }
        GoalCommand::Delete { id } => {
            let goal = tracker
                .delete_goal(&id)
                .with_context(|| format!("deleting goal {:?}", id))?;
            println!("Deleted goal {:?}.", goal.title);
        }
    }
    Ok(())
}

fn print_goal(goal: &Goal, today: NaiveDate) {
    println!(
        "  [{}] {}  {}/{} ({}%)  due {} {}",
        goal.priority,
        goal.title,
        goal.current_progress,
        goal.target_topics,
        goal.percent(),
        goal.target_date.format("%Y-%m-%d"),
        deadline_label(goal, today)
    );
    if !goal.description.is_empty() {
        println!("      {}", goal.description);
    }
    println!("      id: {}", goal.id);
}

fn deadline_label(goal: &Goal, today: NaiveDate) -> String {
    if goal.completed {
        return "(done)".to_string();
    }
    let days = goal.days_until_target(today);
    match goal.deadline_status(today) {
        DeadlineStatus::Overdue => format!("(overdue by {} days)", -days),
        DeadlineStatus::Urgent if days == 0 => "(due today!)".to_string(),
        DeadlineStatus::Urgent => format!("(urgent: {days} days left)"),
        DeadlineStatus::OnTrack => format!("({days} days left)"),
    }
}

/// Start from the stored goal and apply only the fields given on the command line.
fn merged_draft(existing: &Goal, args: &GoalEditArgs) -> GoalDraft {
    GoalDraft {
        title: args.title.clone().unwrap_or_else(|| existing.title.clone()),
        description: args
            .description
            .clone()
            .unwrap_or_else(|| existing.description.clone()),
        target_date: args
            .date
            .clone()
            .unwrap_or_else(|| existing.target_date.format("%Y-%m-%d").to_string()),
        target_topics: args
            .topics
            .clone()
            .unwrap_or_else(|| existing.target_topics.to_string()),
        priority: args.priority.unwrap_or(existing.priority),
    }
}

fn parse_session_length(value: &str) -> Result<SessionLength, String> {
    let minutes: u32 = value
        .trim()
        .parse()
        .map_err(|_| format!("{value:?} is not a number of minutes"))?;
    SessionLength::try_from(minutes)
        .map_err(|m| format!("session length must be 25, 45 or 60 minutes, got {m}"))
}

fn handle_timer(args: TimerArgs, config: &StudyConfig) -> Result<()> {
    let TimerArgs {
        length,
        cycles,
        quiet,
        json,
        tick_ms,
    } = args;
    if cycles == 0 {
        anyhow::bail!("--cycles must be at least 1");
    }
    let mut tracker = open_tracker(config)?;
    let length = match length {
        Some(length) => length,
        None => config.session_length()?,
    };
    let chime: Box<dyn Chime> = if config.chime && !quiet {
        Box::new(TerminalBell)
    } else {
        Box::new(SilentChime)
    };
    let mut timer = Timer::with_chime(length, chime);
    let interval = Duration::from_millis(tick_ms);

    for cycle in 1..=cycles {
        timer.start();
        if !json {
            println!(
                "Cycle {cycle}/{cycles}: {} minute focus, then a 5 minute break",
                length.minutes()
            );
        }
        while let Some(token) = timer.armed_token() {
            thread::sleep(interval);
            match timer.tick(token) {
                TickOutcome::Completed(event) => {
                    if !json {
                        eprintln!();
                    }
                    report_event(&mut tracker, event, json)?;
                }
                TickOutcome::Counted if !json => render_countdown(&timer)?,
                TickOutcome::Counted | TickOutcome::Ignored => {}
            }
        }
    }
    if !json {
        println!("Sessions completed this run: {}", timer.sessions_today());
    }
    Ok(())
}

fn report_event(
    tracker: &mut StudyTracker<JsonFileStore>,
    event: TimerEvent,
    json: bool,
) -> Result<()> {
    if let TimerEvent::FocusCompleted { session_minutes } = event {
        let session = StudySession {
            minutes: session_minutes,
            day: Local::now().date_naive(),
        };
        let stats = tracker
            .record_focus_session(session)
            .context("recording focus session")?;
        if !json {
            println!(
                "Focus session complete. Streak {}, total {}.",
                stats.streak,
                progress::format_study_time(stats.total_minutes)
            );
        }
    } else if !json {
        println!("Break over.");
    }
    if json {
        println!("{}", serde_json::to_string(&event)?);
    }
    Ok(())
}

fn render_countdown(timer: &Timer) -> Result<()> {
    let snap = timer.snapshot();
    let label = match snap.phase {
        Phase::Focus => "Focus",
        Phase::Break => "Break",
    };
    let percent = (snap.progress * 100.0).round() as u32;
    let mut err = std::io::stderr();
    write!(
        err,
        "\r{label} {}  {}",
        snap.display,
        progress_bar(percent, 30)
    )?;
    err.flush()?;
    Ok(())
}

fn handle_export(args: ExportArgs, config: &StudyConfig) -> Result<()> {
    let ExportArgs { output, stdout } = args;
    let tracker = open_tracker(config)?;
    let now = Utc::now();
    let report = tracker.export(now);
    let json = serde_json::to_string_pretty(&report)?;

    if stdout {
        println!("{json}");
        return Ok(());
    }
    let path = output.unwrap_or_else(|| {
        PathBuf::from(progress::export_file_name(
            &config.namespace,
            now.with_timezone(&Local).date_naive(),
        ))
    });
    fs::write(&path, json.as_bytes()).with_context(|| format!("writing {:?}", path))?;
    println!("Exported progress to {}", path.display());
    Ok(())
}

fn handle_theme(args: ThemeArgs, config: &StudyConfig) -> Result<()> {
    let ThemeArgs { mode } = args;
    let mut tracker = open_tracker(config)?;
    let current = tracker.dark_mode();
    let next = match mode {
        None => current,
        Some(ThemeMode::Dark) => true,
        Some(ThemeMode::Light) => false,
        Some(ThemeMode::Toggle) => !current,
    };
    if mode.is_some() {
        tracker.set_dark_mode(next).context("saving theme")?;
    }
    println!("{}", if next { "dark" } else { "light" });
    Ok(())
}

fn handle_reset(args: ResetArgs, config: &StudyConfig) -> Result<()> {
    let ResetArgs { yes } = args;
    if !yes {
        anyhow::bail!("refusing to clear progress without --yes");
    }
    let mut tracker = open_tracker(config)?;
    let before = tracker.completed_items();
    tracker.reset_progress().context("resetting progress")?;
    println!("Cleared {before} completed topics.");
    Ok(())
}

fn progress_bar(percent: u32, width: usize) -> String {
    let filled = (percent.min(100) as usize * width + 50) / 100;
    format!("[{}{}]", "#".repeat(filled), "-".repeat(width - filled))
}
