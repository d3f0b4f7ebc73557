use std::fs::{self, File};
use std::io::BufReader;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context};
use clap::{ArgAction, Args, Parser, Subcommand};
use compat_league::bin::{self, BinDocument};
use compat_league::hash::HashDomain;
use compat_league::hashtable::HashTables;
use compat_league::wad;
use compat_league::{wad_extract, wad_pack};
use repath_core::audit::{self, AuditError, AuditReport};
use repath_core::config::{resolve_hash_dir, RepathConfig};
use repath_core::logging::{self, LogLevel};
use repath_core::pipeline::{
    PipelineError, PipelineInput, PipelineReport, RepathPipeline, REPORT_FILE_NAME,
};
use repath_core::repair;
use repath_core::repath::{self, RepathError, DEFAULT_SEGMENT};
use repath_core::scan;
use repath_core::source_index::SourceIndex;
use repath_core::unify::{is_asset_reference, unify_path};

const EXIT_SUCCESS: i32 = 0;
const EXIT_USAGE: i32 = 2;
const EXIT_INPUT_DIR: i32 = 10;
const EXIT_ARCHIVE: i32 = 11;
const EXIT_DOCUMENT: i32 = 12;
const EXIT_REPATH: i32 = 13;
const EXIT_AUDIT: i32 = 14;

#[derive(Parser)]
#[command(name = "tools", version, about = "League mod repathing tools")]
struct Cli {
    /// Repeat for more log output (-v info, -vv debug, -vvv trace).
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    Wad(WadArgs),
    Bin(BinArgs),
    /// Relocate the assets of root documents from an extracted tree.
    Repath(RepathArgs),
    /// Check a repathed tree for missing references.
    Audit(AuditArgs),
    /// Extract, repath, repack and audit a package or archive.
    Run(RunArgs),
    /// Print the canonical key and path hash of each path.
    Unify {
        #[arg(required = true)]
        paths: Vec<String>,
    },
}

#[derive(Parser)]
struct WadArgs {
    #[command(subcommand)]
    command: WadCommand,
}

#[derive(Subcommand)]
enum WadCommand {
    List {
        #[arg(long, value_name = "PATH")]
        wad: PathBuf,
        #[arg(long, value_name = "DIR")]
        hashes: Option<PathBuf>,
    },
    Extract {
        #[arg(long, value_name = "PATH")]
        wad: PathBuf,
        #[arg(long, value_name = "DIR")]
        out: PathBuf,
        #[arg(long, value_name = "DIR")]
        hashes: Option<PathBuf>,
    },
    Pack {
        #[arg(long, value_name = "DIR")]
        dir: PathBuf,
        #[arg(long, value_name = "PATH")]
        out: PathBuf,
    },
}

#[derive(Parser)]
struct BinArgs {
    #[command(subcommand)]
    command: BinCommand,
}

#[derive(Subcommand)]
enum BinCommand {
    Dump {
        #[arg(long, value_name = "PATH")]
        bin: PathBuf,
        #[arg(long, value_name = "DIR")]
        hashes: Option<PathBuf>,
    },
}

/// Config file plus the flags that override it.
#[derive(Args)]
struct ConfigArgs {
    #[arg(long, value_name = "TOML")]
    config: Option<PathBuf>,
    #[arg(long)]
    segment: Option<String>,
    #[arg(long)]
    ignore_missing: bool,
    #[arg(long)]
    combine_linked: bool,
}

#[derive(Parser)]
struct RepathArgs {
    #[arg(long, value_name = "DIR")]
    source: PathBuf,
    #[arg(long = "root", value_name = "REL", required = true)]
    roots: Vec<String>,
    #[arg(long, value_name = "DIR")]
    out: PathBuf,
    #[command(flatten)]
    options: ConfigArgs,
    /// Remove the output directory first.
    #[arg(long)]
    clean: bool,
    #[arg(long, value_name = "PATH")]
    wad_out: Option<PathBuf>,
}

#[derive(Parser)]
struct AuditArgs {
    #[arg(long, value_name = "DIR")]
    dir: PathBuf,
    /// Relocation segment; repeat when documents used several.
    #[arg(long = "segment", default_value = DEFAULT_SEGMENT)]
    segments: Vec<String>,
    #[arg(long, value_name = "PATH")]
    report: Option<PathBuf>,
}

#[derive(Parser)]
struct RunArgs {
    #[arg(long, value_name = "ZIP", conflicts_with = "wad", required_unless_present = "wad")]
    package: Option<PathBuf>,
    /// Archive member to repath when the package holds several.
    #[arg(long, requires = "package")]
    member: Option<String>,
    #[arg(long, value_name = "PATH")]
    wad: Option<PathBuf>,
    /// Unmodified game archive the mod's files are laid over.
    #[arg(long, value_name = "PATH")]
    baseline: Option<PathBuf>,
    #[arg(long = "root", value_name = "REL", required = true)]
    roots: Vec<String>,
    #[arg(long, value_name = "DIR")]
    work: PathBuf,
    #[command(flatten)]
    options: ConfigArgs,
    #[arg(long, value_name = "DIR")]
    hashes: Option<PathBuf>,
    #[arg(long, value_name = "ZIP")]
    package_out: Option<PathBuf>,
    /// Remove the work directory first.
    #[arg(long)]
    clean: bool,
    /// Write the stage reports to `<work>/repath_report.json`.
    #[arg(long)]
    report: bool,
}

/// A failed command: what to print and which code to exit with.
struct Failure {
    code: i32,
    error: anyhow::Error,
}

impl Failure {
    fn new(code: i32, error: impl Into<anyhow::Error>) -> Self {
        Self {
            code,
            error: error.into(),
        }
    }
}

type CliResult = Result<(), Failure>;

trait OrExit<T> {
    fn or_exit(self, code: i32) -> Result<T, Failure>;
}

impl<T, E: Into<anyhow::Error>> OrExit<T> for Result<T, E> {
    fn or_exit(self, code: i32) -> Result<T, Failure> {
        self.map_err(|err| Failure::new(code, err))
    }
}

fn main() {
    let cli = Cli::parse();
    logging::init(LogLevel::from_verbosity(cli.verbose));
    let result = match cli.command {
        Commands::Wad(args) => run_wad(args),
        Commands::Bin(args) => run_bin(args),
        Commands::Repath(args) => run_repath(args),
        Commands::Audit(args) => run_audit(args),
        Commands::Run(args) => run_pipeline(args),
        Commands::Unify { paths } => run_unify(&paths),
    };
    let exit_code = match result {
        Ok(()) => EXIT_SUCCESS,
        Err(failure) => {
            eprintln!("error: {:#}", failure.error);
            failure.code
        }
    };
    std::process::exit(exit_code);
}

fn run_wad(args: WadArgs) -> CliResult {
    match args.command {
        WadCommand::List { wad, hashes } => list_archive(&wad, hashes.as_deref()),
        WadCommand::Extract { wad, out, hashes } => extract_archive(&wad, &out, hashes.as_deref()),
        WadCommand::Pack { dir, out } => pack_archive(&dir, &out),
    }
}

fn list_archive(archive: &Path, hashes: Option<&Path>) -> CliResult {
    let tables = load_tables(hashes, &RepathConfig::default(), false)?;
    let file = File::open(archive)
        .with_context(|| format!("open {}", archive.display()))
        .or_exit(EXIT_ARCHIVE)?;
    let toc = wad::read_toc(&mut BufReader::new(file)).or_exit(EXIT_ARCHIVE)?;

    println!(
        "wad: {} (v{}, {} chunks)",
        archive.display(),
        toc.version,
        toc.chunks().len()
    );
    for chunk in toc.chunks() {
        println!(
            "{} {:>10} {:>10} {:<10} {:<3} {}",
            chunk.hash_hex(),
            chunk.compressed_size,
            chunk.uncompressed_size,
            chunk.compression.to_string(),
            if chunk.duplicated { "dup" } else { "" },
            tables.display_name(HashDomain::Archive, chunk.path_hash)
        );
    }
    Ok(())
}

fn extract_archive(archive: &Path, out_dir: &Path, hashes: Option<&Path>) -> CliResult {
    let tables = load_tables(hashes, &RepathConfig::default(), false)?;
    let report = wad_extract::extract_wad(archive, out_dir, &tables).or_exit(EXIT_ARCHIVE)?;
    println!(
        "extracted {} chunks to {} ({} hashed names, {} failed)",
        report.extracted,
        out_dir.display(),
        report.hashed,
        report.failed
    );
    Ok(())
}

fn pack_archive(dir: &Path, archive: &Path) -> CliResult {
    if !dir.is_dir() {
        return Err(Failure::new(
            EXIT_INPUT_DIR,
            anyhow!("input dir not found: {}", dir.display()),
        ));
    }
    let report = wad_pack::pack_dir(dir, archive).or_exit(EXIT_ARCHIVE)?;
    println!(
        "packed {} chunks into {} ({} shared, {} bytes stored)",
        report.chunks,
        archive.display(),
        report.shared,
        report.stored_bytes
    );
    for collision in &report.collisions {
        eprintln!("hash collision skipped: {}", collision);
    }
    Ok(())
}

fn run_bin(args: BinArgs) -> CliResult {
    match args.command {
        BinCommand::Dump { bin: path, hashes } => {
            let tables = load_tables(hashes.as_deref(), &RepathConfig::default(), false)?;
            let document = bin::read_bin(&path).or_exit(EXIT_DOCUMENT)?;
            print_document(&document, &tables);
            Ok(())
        }
    }
}

fn print_document(document: &BinDocument, tables: &HashTables) {
    let kind = if document.is_patch() { "PTCH" } else { "PROP" };
    println!("{} v{}", kind, document.version);
    for link in &document.links {
        println!("link {}", link);
    }
    for entry in &document.entries {
        println!(
            "entry {} type {} ({} fields)",
            tables.display_name(HashDomain::Document, u64::from(entry.hash)),
            tables.display_name(HashDomain::Document, u64::from(entry.type_hash)),
            entry.fields.len()
        );
        entry.visit_strings(&mut |value| println!("    {}", value));
    }
    for patch in &document.patches {
        println!(
            "patch {} {}",
            tables.display_name(HashDomain::Document, u64::from(patch.hash)),
            patch.path
        );
    }
}

fn run_repath(args: RepathArgs) -> CliResult {
    let config = args.options.resolve()?;
    if !args.source.is_dir() {
        return Err(Failure::new(
            EXIT_INPUT_DIR,
            anyhow!("source dir not found: {}", args.source.display()),
        ));
    }
    if args.clean {
        clean_dir(&args.out, Some(&args.source))?;
    }

    let index = SourceIndex::build(&args.source)
        .with_context(|| format!("index {}", args.source.display()))
        .or_exit(EXIT_INPUT_DIR)?;
    let tree = scan::scan(&args.roots, &index).or_exit(EXIT_DOCUMENT)?;
    let plan = config.relocation_plan();
    let report = repath::rewrite(&tree, &index, &plan, &args.out, config.rewrite_options())
        .map_err(|err| Failure::new(repath_exit_code(&err), err))?;

    if config.repair_documents {
        let repaired =
            repair::repair_outputs(&args.roots, &index, &args.out).or_exit(EXIT_DOCUMENT)?;
        println!(
            "repaired {} sampler names, {} texture paths, {} health bars",
            repaired.sampler_names, repaired.texture_paths, repaired.health_bars
        );
    }

    println!(
        "repathed {} entries into {}: {} assets, {} documents, {} strings rewritten",
        tree.entries.len(),
        args.out.display(),
        report.copied_assets,
        report.copied_documents,
        report.rewritten_strings
    );
    for failure in &report.failures {
        eprintln!("copy failed: {}", failure);
    }

    if let Some(wad_out) = &args.wad_out {
        let pack = wad_pack::pack_dir(&args.out, wad_out).or_exit(EXIT_ARCHIVE)?;
        println!("packed {} chunks into {}", pack.chunks, wad_out.display());
    }
    Ok(())
}

fn run_audit(args: AuditArgs) -> CliResult {
    let segments: Vec<&str> = args.segments.iter().map(String::as_str).collect();
    let report = audit::audit(&args.dir, &segments).map_err(|err| {
        let code = match err {
            AuditError::MissingDir(_) => EXIT_INPUT_DIR,
            AuditError::Io { .. } => EXIT_AUDIT,
        };
        Failure::new(code, err)
    })?;
    if let Some(path) = &args.report {
        let text = serde_json::to_string_pretty(&report).or_exit(EXIT_AUDIT)?;
        fs::write(path, text)
            .with_context(|| format!("write {}", path.display()))
            .or_exit(EXIT_AUDIT)?;
    }
    print_audit(&report);

    let missing = report.missing_count();
    if missing > 0 || !report.unreadable.is_empty() {
        return Err(Failure::new(
            EXIT_AUDIT,
            anyhow!(
                "{} missing references, {} unreadable documents",
                missing,
                report.unreadable.len()
            ),
        ));
    }
    Ok(())
}

fn print_audit(report: &AuditReport) {
    println!(
        "audited {} documents: {} missing references, {} junk files",
        report.documents.len(),
        report.missing_count(),
        report.junk_files.len()
    );
    for path in report.missing_paths() {
        println!("missing {}", path);
    }
    for path in &report.unreadable {
        println!("unreadable {}", path);
    }
    for path in &report.junk_files {
        println!("junk {}", path);
    }
}

fn run_pipeline(args: RunArgs) -> CliResult {
    let config = args.options.resolve()?;
    let tables = load_tables(args.hashes.as_deref(), &config, true)?;
    let input = match (args.package, args.wad) {
        (Some(path), _) => PipelineInput::Package {
            path,
            member: args.member,
        },
        (None, Some(path)) => PipelineInput::Wad(path),
        (None, None) => {
            return Err(Failure::new(EXIT_USAGE, anyhow!("--package or --wad is required")));
        }
    };
    if args.clean {
        clean_dir(&args.work, None)?;
    }

    let mut pipeline = RepathPipeline::new(input, args.roots, &args.work).with_config(config);
    pipeline.baseline = args.baseline;
    pipeline.package_out = args.package_out;
    let report = pipeline
        .run(&tables)
        .map_err(|err| Failure::new(pipeline_exit_code(&err), err))?;

    if args.report {
        let path = args.work.join(REPORT_FILE_NAME);
        report.write_json(&path).or_exit(EXIT_REPATH)?;
        println!("report: {}", path.display());
    }
    print_pipeline(&report);
    Ok(())
}

fn print_pipeline(report: &PipelineReport) {
    if let (Some(baseline), Some(overlay)) = (&report.baseline, &report.overlay) {
        println!(
            "baseline {} chunks, {} mod files laid over ({} skipped)",
            baseline.extracted, overlay.copied, overlay.skipped
        );
    }
    println!(
        "extracted {} chunks ({} hashed), scanned {} entries in {} documents",
        report.extract.extracted,
        report.extract.hashed,
        report.scan.entries,
        report.scan.documents
    );
    println!(
        "copied {} assets and {} documents, {} placeholders",
        report.rewrite.copied_assets, report.rewrite.copied_documents, report.placeholders
    );
    println!("output archive: {}", report.output_archive);
    if let Some(package) = &report.output_package {
        println!("output package: {}", package);
    }
    print_audit(&report.audit);
}

fn run_unify(paths: &[String]) -> CliResult {
    for raw in paths {
        let key = unify_path(raw);
        let note = if is_asset_reference(raw) { "" } else { " (not an asset reference)" };
        println!(
            "{} {}{}",
            HashDomain::Archive.format(key.path_hash()),
            key,
            note
        );
    }
    Ok(())
}

impl ConfigArgs {
    /// The config file (or defaults) with command-line overrides applied.
    fn resolve(&self) -> Result<RepathConfig, Failure> {
        let mut config = match &self.config {
            Some(path) => RepathConfig::load(path).or_exit(EXIT_USAGE)?,
            None => RepathConfig::default(),
        };
        if let Some(segment) = &self.segment {
            config.segment = segment.clone();
        }
        config.ignore_missing |= self.ignore_missing;
        config.combine_linked |= self.combine_linked;
        config.into_validated().or_exit(EXIT_USAGE)
    }
}

/// Hash tables from the resolved directory. Without `required` a missing
/// directory leaves every hash unresolved instead of failing.
fn load_tables(
    cli: Option<&Path>,
    config: &RepathConfig,
    required: bool,
) -> Result<HashTables, Failure> {
    let resolved = match resolve_hash_dir(cli, config) {
        Ok(resolved) => resolved,
        Err(err) if !required => {
            tracing::warn!("{}", err);
            return Ok(HashTables::new());
        }
        Err(err) => return Err(Failure::new(EXIT_USAGE, err)),
    };
    tracing::debug!("{}", resolved.describe());
    let (tables, stats) = HashTables::load_dir(&resolved.path).or_exit(EXIT_INPUT_DIR)?;
    if stats.files == 0 {
        tracing::warn!(dir = %resolved.path.display(), "no hash table files found");
    }
    Ok(tables)
}

fn clean_dir(dir: &Path, keep: Option<&Path>) -> CliResult {
    if !dir.exists() {
        return Ok(());
    }
    if let Some(keep) = keep {
        if paths_overlap(dir, keep) {
            return Err(Failure::new(
                EXIT_USAGE,
                anyhow!(
                    "refusing to clean {}: it overlaps the source dir {}",
                    dir.display(),
                    keep.display()
                ),
            ));
        }
    }
    fs::remove_dir_all(dir)
        .with_context(|| format!("clean {}", dir.display()))
        .or_exit(EXIT_REPATH)
}

/// True when `a` and `b` are the same directory or one contains the other.
fn paths_overlap(a: &Path, b: &Path) -> bool {
    let a = a.canonicalize().unwrap_or_else(|_| a.to_path_buf());
    let b = b.canonicalize().unwrap_or_else(|_| b.to_path_buf());
    a.starts_with(&b) || b.starts_with(&a)
}

fn repath_exit_code(err: &RepathError) -> i32 {
    match err {
        RepathError::InvalidSegment(_) | RepathError::OutputNotEmpty(_) => EXIT_USAGE,
        RepathError::Document { .. } => EXIT_DOCUMENT,
        RepathError::NoEntriesScanned
        | RepathError::MissingSourceAsset { .. }
        | RepathError::Io { .. } => EXIT_REPATH,
    }
}

fn pipeline_exit_code(err: &PipelineError) -> i32 {
    match err {
        PipelineError::WorkDirNotEmpty(_) | PipelineError::AmbiguousWadMember(_) => EXIT_USAGE,
        PipelineError::Io { .. } => EXIT_INPUT_DIR,
        PipelineError::NoWadMember | PipelineError::Package(_) | PipelineError::Wad(_) => {
            EXIT_ARCHIVE
        }
        PipelineError::Repair(_) | PipelineError::Scan(_) => EXIT_DOCUMENT,
        PipelineError::Repath(err) => repath_exit_code(err),
        PipelineError::Audit(_) => EXIT_AUDIT,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn run_needs_exactly_one_input() {
        let base = ["tools", "run", "--root", "data/a.bin", "--work", "w"];
        assert!(Cli::try_parse_from(base).is_err());

        let both = base
            .iter()
            .copied()
            .chain(["--wad", "a.wad.client", "--package", "a.fantome"]);
        assert!(Cli::try_parse_from(both).is_err());

        let wad = base.iter().copied().chain(["--wad", "a.wad.client", "-vv"]);
        let cli = Cli::try_parse_from(wad).expect("parse");
        assert_eq!(cli.verbose, 2);
        assert!(matches!(cli.command, Commands::Run(RunArgs { wad: Some(_), .. })));

        let layered = base
            .iter()
            .copied()
            .chain(["--package", "a.fantome", "--baseline", "game/a.wad.client"]);
        let cli = Cli::try_parse_from(layered).expect("parse");
        assert!(matches!(
            cli.command,
            Commands::Run(RunArgs { baseline: Some(_), package: Some(_), .. })
        ));
    }

    #[test]
    fn audit_accepts_several_segments() {
        let cli = Cli::try_parse_from(["tools", "audit", "--dir", "out"]).expect("parse");
        let Commands::Audit(args) = cli.command else {
            panic!("audit expected");
        };
        assert_eq!(args.segments, vec![DEFAULT_SEGMENT.to_string()]);

        let cli = Cli::try_parse_from([
            "tools", "audit", "--dir", "out", "--segment", "frog", "--segment", "toad",
        ])
        .expect("parse");
        let Commands::Audit(args) = cli.command else {
            panic!("audit expected");
        };
        assert_eq!(args.segments, vec!["frog".to_string(), "toad".to_string()]);
    }

    #[test]
    fn repath_flags_override_config() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = dir.path().join("repath.toml");
        fs::write(&config, "segment = \"frog\"\ncombine_linked = true\n").expect("write");

        let args = ConfigArgs {
            config: Some(config.clone()),
            segment: Some("toad".to_string()),
            ignore_missing: true,
            combine_linked: false,
        };
        let resolved = args.resolve().map_err(|f| f.error).expect("resolve");
        assert_eq!(resolved.segment, "toad");
        assert!(resolved.ignore_missing);
        assert!(resolved.combine_linked);

        let bad = ConfigArgs {
            config: Some(config),
            segment: Some("a/b".to_string()),
            ignore_missing: false,
            combine_linked: false,
        };
        assert_eq!(bad.resolve().err().map(|f| f.code), Some(EXIT_USAGE));
    }

    #[test]
    fn failures_map_to_exit_codes() {
        assert_eq!(repath_exit_code(&RepathError::NoEntriesScanned), EXIT_REPATH);
        assert_eq!(
            repath_exit_code(&RepathError::InvalidSegment("a/b".to_string())),
            EXIT_USAGE
        );
        assert_eq!(
            pipeline_exit_code(&PipelineError::Repath(RepathError::MissingSourceAsset {
                entry: "00000001".to_string(),
                path: "assets/x.dds".to_string(),
            })),
            EXIT_REPATH
        );
        assert_eq!(pipeline_exit_code(&PipelineError::NoWadMember), EXIT_ARCHIVE);
        assert_eq!(
            pipeline_exit_code(&PipelineError::Audit(AuditError::MissingDir("x".to_string()))),
            EXIT_AUDIT
        );
    }

    #[test]
    fn clean_refuses_the_source_dir() {
        let dir = tempfile::tempdir().expect("tempdir");
        let failure = clean_dir(dir.path(), Some(dir.path())).expect_err("same dir");
        assert_eq!(failure.code, EXIT_USAGE);
        assert!(dir.path().is_dir());

        let source = dir.path().join("source");
        let out = dir.path().join("out");
        fs::create_dir_all(&source).expect("mkdir");
        fs::create_dir_all(out.join("nested")).expect("mkdir");
        assert!(clean_dir(&out, Some(&source)).is_ok());
        assert!(!out.exists());
        assert!(source.is_dir());
    }

    #[test]
    fn clean_refuses_dirs_nested_with_the_source() {
        let dir = tempfile::tempdir().expect("tempdir");
        let work = dir.path().join("work");
        let extracted = work.join("extracted");
        fs::create_dir_all(&extracted).expect("mkdir");
        fs::write(extracted.join("a.bin"), b"x").expect("write");

        let failure = clean_dir(&work, Some(&extracted)).expect_err("source inside out");
        assert_eq!(failure.code, EXIT_USAGE);
        assert!(extracted.join("a.bin").is_file());

        let inner = extracted.join("out");
        fs::create_dir_all(&inner).expect("mkdir");
        let failure = clean_dir(&inner, Some(&extracted)).expect_err("out inside source");
        assert_eq!(failure.code, EXIT_USAGE);
        assert!(inner.is_dir());

        let relative = work.join("extracted/../extracted");
        assert!(clean_dir(&work, Some(&relative)).is_err());
    }
}
