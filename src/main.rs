//! Qiantu Doctor — support tool for 58pic / qiantucdn connectivity problems.
//!
//! Usage:
//!   qiantu-doctor problems                     # List known problems
//!   qiantu-doctor fix preview [--commit]       # Apply the fix for a problem
//!   qiantu-doctor bind --domain dl.58pic.com   # Preview a binding
//!   qiantu-doctor unbind [--domain D]          # Remove bindings (all tracked if no domain)
//!   qiantu-doctor check [--domain D]           # Show current bindings
//!   qiantu-doctor resolve dl.58pic.com         # Look up an address only
//!   qiantu-doctor pin dl.58pic.com 1.2.3.4     # Record an address in the mappings file
//!   qiantu-doctor flush-dns                    # Flush the OS DNS cache
//!   qiantu-doctor diagnose                     # Environment report
//!   qiantu-doctor diagnose-download URL        # Check a failed download link
//!
//! Without `--commit` every editing command only prints a preview.

use clap::{Args, Parser, Subcommand};
use qiantu_doctor::commit::DiskAccess;
use qiantu_doctor::config::{self, Settings};
use qiantu_doctor::domains::{self, Action, Problem};
use qiantu_doctor::editor::{BindOutcome, HostsEditor, UnbindOutcome, UnbindTarget};
use qiantu_doctor::hosts::Upsert;
use qiantu_doctor::lookup::LocalDns;
use qiantu_doctor::resolver::Resolver;
use qiantu_doctor::{download, elevation, platform, report, AppError};
use std::io::{self, Write};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Lines of the new hosts file shown in an unbind preview.
const PREVIEW_LINES: usize = 10;

#[derive(Parser)]
#[command(name = "qiantu-doctor", version, about = "Fix 58pic / qiantucdn access problems")]
struct Cli {
    #[command(flatten)]
    global: GlobalArgs,

    #[command(subcommand)]
    command: Command,
}

#[derive(Args)]
struct GlobalArgs {
    /// Hosts file to edit instead of the system one.
    #[arg(long, global = true)]
    hosts_file: Option<PathBuf>,

    /// Directory holding settings.json and domain_mappings.json.
    #[arg(long, global = true)]
    config_dir: Option<PathBuf>,

    /// Domain mappings file to use instead of the one in the config directory.
    #[arg(long, global = true)]
    mappings: Option<PathBuf>,

    /// Never prompt for administrator privileges.
    #[arg(long, global = true)]
    no_elevate: bool,

    /// Debug logging.
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Args)]
struct EditFlags {
    /// Write the hosts file (backed up first). Without this only a preview is shown.
    #[arg(long)]
    commit: bool,

    /// Skip addresses configured in the mappings file.
    #[arg(long)]
    no_config: bool,
}

#[derive(Subcommand)]
enum Command {
    /// List the problems this tool knows how to fix.
    Problems,

    /// Apply the hosts change for a problem.
    Fix {
        problem: String,
        #[command(flatten)]
        flags: EditFlags,
    },

    /// Bind domains to their current address.
    Bind {
        #[arg(long = "domain", required = true)]
        domains: Vec<String>,
        #[command(flatten)]
        flags: EditFlags,
    },

    /// Remove bindings for a domain, or for every tracked domain.
    Unbind {
        #[arg(long)]
        domain: Option<String>,
        #[arg(long)]
        commit: bool,
        /// Do not ask before removing every tracked binding.
        #[arg(long)]
        yes: bool,
    },

    /// Show tracked bindings in the hosts file.
    Check {
        #[arg(long)]
        domain: Option<String>,
    },

    /// Resolve a domain without editing anything.
    Resolve {
        domain: String,
        #[arg(long)]
        no_config: bool,
    },

    /// Record a fixed address for a domain, used before any online lookup.
    Pin { domain: String, ip: String },

    /// Flush the operating system's DNS cache.
    FlushDns,

    /// Collect an environment report for support.
    Diagnose,

    /// Check why a download failed and bind its proxy host if needed.
    DiagnoseDownload {
        /// Link of the download that failed.
        url: Option<String>,
        #[command(flatten)]
        flags: EditFlags,
    },
}

// =========================================================================
// Entry point
// =========================================================================

fn main() {
    let cli = Cli::parse();
    init_tracing(cli.global.verbose);

    if let Err(e) = run(cli) {
        eprintln!("[QiantuDoctor] Error: {e}");
        if e.is_cancelled() {
            eprintln!("The administrator prompt was dismissed. Run the command again and enter your password to apply the change.");
        }
        std::process::exit(1);
    }
}

fn init_tracing(verbose: bool) {
    let default_level = if verbose {
        "qiantu_doctor=debug"
    } else {
        "qiantu_doctor=info"
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(io::stderr)
        .try_init();
}

struct Context {
    editor: HostsEditor,
    settings: Settings,
    mappings_path: PathBuf,
}

fn config_dir(global: &GlobalArgs) -> PathBuf {
    global.config_dir.clone().unwrap_or_else(platform::config_dir)
}

fn mappings_path(global: &GlobalArgs) -> PathBuf {
    global
        .mappings
        .clone()
        .unwrap_or_else(|| config_dir(global).join(config::MAPPINGS_FILE))
}

/// Settings, resolver and editor. Only built for commands that use them, so a
/// broken settings file or HTTP client never blocks the read-only ones.
fn build_context(global: &GlobalArgs) -> Result<Context, AppError> {
    let settings = config::load_settings(&config_dir(global))?;

    let hosts_path = global
        .hosts_file
        .clone()
        .or_else(|| settings.hosts_file.clone())
        .unwrap_or_else(platform::hosts_file_path);
    let mappings_path = mappings_path(global);

    let resolver = Resolver::with_default_lookups(&mappings_path)?;
    let elevator = elevation::platform_elevator(settings.elevate && !global.no_elevate);
    let editor = HostsEditor::new(
        hosts_path,
        domains::tracked_domains(&settings.extra_tracked_domains),
        resolver,
        Box::new(DiskAccess),
        elevator,
    );

    Ok(Context {
        editor,
        settings,
        mappings_path,
    })
}

fn run(cli: Cli) -> Result<(), AppError> {
    let global = &cli.global;

    match cli.command {
        Command::Problems => {
            print_problems();
            Ok(())
        }
        Command::Fix { problem, flags } => run_fix(&build_context(global)?, &problem, &flags),
        Command::Bind { domains, flags } => run_bind(&build_context(global)?, &domains, &flags),
        Command::Unbind {
            domain,
            commit,
            yes,
        } => run_unbind(&build_context(global)?, domain, commit, yes),
        Command::Check { domain } => run_check(&build_context(global)?, domain.as_deref()),
        Command::Resolve { domain, no_config } => {
            run_resolve(&build_context(global)?, &domain, !no_config)
        }
        Command::Pin { domain, ip } => run_pin(&mappings_path(global), &domain, &ip),
        Command::FlushDns => {
            if platform::flush_dns() {
                println!("DNS cache flushed.");
                Ok(())
            } else {
                Err(AppError::Config(
                    "Could not flush the DNS cache (try again as administrator)".into(),
                ))
            }
        }
        Command::Diagnose => run_diagnose(&build_context(global)?),
        Command::DiagnoseDownload { url, flags } => {
            run_diagnose_download(global, url.as_deref(), &flags)
        }
    }
}

// =========================================================================
// Commands
// =========================================================================

fn print_problems() {
    for problem in Problem::ALL {
        let verb = match problem.action() {
            Action::Bind => "bind",
            Action::Unbind => "unbind",
        };
        println!("{:<15} {}", problem.name(), problem.symptom());
        println!("{:<15} → {verb} {}", "", problem.domains().join(", "));
    }
}

fn run_fix(ctx: &Context, name: &str, flags: &EditFlags) -> Result<(), AppError> {
    let problem: Problem = name.parse()?;
    println!("Problem: {}", problem.symptom());

    let domains: Vec<String> = problem.domains().iter().map(|d| d.to_string()).collect();
    match problem.action() {
        Action::Bind => run_bind(ctx, &domains, flags),
        Action::Unbind => {
            for domain in domains {
                run_unbind(ctx, Some(domain), flags.commit, true)?;
            }
            Ok(())
        }
    }
}

fn run_bind(ctx: &Context, domains: &[String], flags: &EditFlags) -> Result<(), AppError> {
    let outcome = ctx.editor.bind(domains, !flags.no_config, flags.commit)?;
    print_bind(&outcome);

    if !outcome.unresolved.is_empty() {
        println!(
            "Could not find an address for: {}. Add one to {} to pin it manually.",
            outcome.unresolved.join(", "),
            ctx.mappings_path.display()
        );
    }

    match &outcome.backup {
        Some(backup) => after_commit(ctx, backup),
        None => println!("\nPreview only. Re-run with --commit to update the hosts file."),
    }
    Ok(())
}

fn print_bind(outcome: &BindOutcome) {
    println!("{}", "-".repeat(60));
    for b in &outcome.bound {
        let ip = b.resolution.ip.map(|ip| ip.to_string()).unwrap_or_default();
        let note = match b.change {
            Upsert::Added => "new".to_string(),
            Upsert::Replaced { stale: 0 } => "updated".to_string(),
            Upsert::Replaced { stale } => format!("updated, {stale} duplicate(s) removed"),
        };
        println!("{ip}\t{}    ({}, via {})", b.domain, note, b.resolution.source);
    }
    println!("{}", "-".repeat(60));
}

fn run_unbind(
    ctx: &Context,
    domain: Option<String>,
    commit: bool,
    yes: bool,
) -> Result<(), AppError> {
    let target = match domain {
        Some(d) => UnbindTarget::Domain(d.to_lowercase()),
        None => {
            if commit && !yes && !confirm("Remove every tracked site binding? (y/N): ")? {
                println!("Cancelled.");
                return Ok(());
            }
            UnbindTarget::AllTracked
        }
    };

    let outcome = ctx.editor.unbind(&target, commit)?;
    print_unbind(&outcome);

    match &outcome.backup {
        Some(backup) => after_commit(ctx, backup),
        None => println!("\nPreview only. Re-run with --commit to update the hosts file."),
    }
    Ok(())
}

fn print_unbind(outcome: &UnbindOutcome) {
    for entry in &outcome.removed {
        println!("Removing line {}: {} {}", entry.line, entry.ip, entry.hostname);
    }

    let text = String::from_utf8_lossy(&outcome.content);
    let lines: Vec<&str> = text.lines().collect();
    println!("\nNew hosts file (first {PREVIEW_LINES} lines):");
    println!("{}", "-".repeat(60));
    for (i, line) in lines.iter().take(PREVIEW_LINES).enumerate() {
        println!("{:3}: {line}", i + 1);
    }
    if lines.len() > PREVIEW_LINES {
        println!("... ({} more lines)", lines.len() - PREVIEW_LINES);
    }
    println!("{}", "-".repeat(60));
}

fn after_commit(ctx: &Context, backup: &std::path::Path) {
    println!("\nHosts file updated. Backup kept at {}", backup.display());
    if ctx.settings.flush_dns_after_commit && !platform::flush_dns() {
        println!("DNS cache was not flushed; run `qiantu-doctor flush-dns` as administrator.");
    }
    println!("Refresh or restart the browser for the change to take effect.");
}

fn run_check(ctx: &Context, domain: Option<&str>) -> Result<(), AppError> {
    println!("Hosts file: {}", ctx.editor.path().display());

    if let Some(domain) = domain {
        return match ctx.editor.binding_for(domain)? {
            Some(entry) => {
                println!("Domain:  {}", entry.hostname);
                println!("Address: {}", entry.ip);
                println!("Line:    {}", entry.line);
                Ok(())
            }
            None => Err(AppError::NoMatch(domain.to_string())),
        };
    }

    let bindings = ctx.editor.list_tracked_bindings()?;
    if bindings.is_empty() {
        println!("No site bindings found.");
        return Ok(());
    }

    println!("{}", "-".repeat(60));
    println!("{:<30} {:<20} {:<10}", "Domain", "Address", "Line");
    println!("{}", "-".repeat(60));
    for (host, entry) in &bindings {
        println!("{host:<30} {:<20} {:<10}", entry.ip.to_string(), entry.line);
    }
    println!("{}", "-".repeat(60));

    let suspicious: Vec<&String> = bindings
        .iter()
        .filter(|(_, e)| e.ip.is_unspecified() || e.ip.is_loopback())
        .map(|(host, _)| host)
        .collect();
    for host in suspicious {
        println!("Warning: {host} points at {} and will not load.", bindings[host].ip);
    }
    Ok(())
}

fn run_resolve(ctx: &Context, domain: &str, prefer_config: bool) -> Result<(), AppError> {
    let domain = domain.to_lowercase();
    let resolution = ctx.editor.resolver().resolve(&domain, prefer_config);
    match resolution.ip {
        Some(ip) => {
            println!("Domain:  {domain}");
            println!("Address: {ip}");
            println!("Source:  {}", resolution.source);
            Ok(())
        }
        None => Err(AppError::Unresolved(vec![domain])),
    }
}

fn run_pin(mappings_path: &std::path::Path, domain: &str, ip: &str) -> Result<(), AppError> {
    let ip = domains::parse_ipv4(ip)
        .ok_or_else(|| AppError::Config(format!("'{ip}' is not an IPv4 address")))?;
    let mut mappings = config::load_mappings(mappings_path);
    mappings.insert(domain.to_lowercase(), ip.to_string());
    config::save_mappings(mappings_path, &mappings)?;
    println!("{domain} → {ip} saved to {}", mappings_path.display());
    Ok(())
}

fn run_diagnose(ctx: &Context) -> Result<(), AppError> {
    let (handle, progress) = report::spawn(report::ReportRequest {
        hosts_path: ctx.editor.path().to_path_buf(),
        mappings_path: ctx.mappings_path.clone(),
        tracked: ctx.editor.tracked().to_vec(),
        dns: Box::new(LocalDns),
    });

    for p in progress {
        eprintln!("[{}/{}] {}", p.step, p.total, p.label);
    }
    let report = handle
        .join()
        .map_err(|_| AppError::Config("Diagnostic worker panicked".into()))?;

    println!("{report}");
    Ok(())
}

fn run_diagnose_download(
    global: &GlobalArgs,
    url: Option<&str>,
    flags: &EditFlags,
) -> Result<(), AppError> {
    println!("1. Download managers");
    let managers = download::installed_download_managers();
    if managers.is_empty() {
        println!("   None of the common download managers are installed.");
    } else {
        println!(
            "   Installed: {}. Download with the browser itself, not a download manager.",
            managers.join(", ")
        );
    }

    println!("2. Browser cloud acceleration");
    println!("   Turn off cloud-accelerated downloads in the browser settings (on by default in 360 Browser).");

    let Some(url) = url else {
        println!("\nPass the failing download link to check its host as well.");
        return Ok(());
    };

    println!("3. Download link");
    let check = download::check_download_url(url);
    let Some(domain) = check.domain.clone() else {
        return Err(AppError::Config(format!(
            "Cannot find a host in '{url}'; check the link"
        )));
    };
    println!("   Host: {domain}");

    if !check.needs_hosts_bind() {
        println!("   The host is not a download proxy; no hosts binding needed.");
        return Ok(());
    }

    println!(
        "   {domain} is a download proxy and needs a hosts binding \
         (`qiantu-doctor fix download-fail` binds every proxy).\n"
    );
    run_bind(&build_context(global)?, &[domain], flags)
}

// =========================================================================
// Helpers
// =========================================================================

fn confirm(label: &str) -> Result<bool, AppError> {
    print!("{label}");
    io::stdout().flush()?;
    let mut input = String::new();
    io::stdin().read_line(&mut input)?;
    Ok(input.trim().eq_ignore_ascii_case("y"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::path::Path;

    fn cli(config_dir: &Path, args: &[&str]) -> Cli {
        let mut argv = vec![
            "qiantu-doctor".to_string(),
            "--config-dir".to_string(),
            config_dir.display().to_string(),
        ];
        argv.extend(args.iter().map(|a| a.to_string()));
        Cli::try_parse_from(argv).unwrap()
    }

    fn broken_settings() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(config::SETTINGS_FILE), "{not json").unwrap();
        dir
    }

    #[test]
    fn settings_free_commands_survive_broken_settings() {
        let dir = broken_settings();

        run(cli(dir.path(), &["problems"])).unwrap();
        run(cli(dir.path(), &["pin", "dl.58pic.com", "5.6.7.8"])).unwrap();
        run(cli(dir.path(), &["diagnose-download", "https://dl.58pic.com/a.psd"])).unwrap();

        let mappings = config::load_mappings(&dir.path().join(config::MAPPINGS_FILE));
        assert_eq!(mappings["dl.58pic.com"], "5.6.7.8");
    }

    #[test]
    fn editing_commands_report_broken_settings() {
        let dir = broken_settings();
        let err = run(cli(dir.path(), &["check"])).unwrap_err();
        assert!(matches!(err, AppError::Config(_)));
    }
}
