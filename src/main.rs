use std::fs::{self, File, OpenOptions};
use std::path::PathBuf;
use std::process;

use clap::Parser;
use memmap2::{Mmap, MmapMut};

use dtbpatch::fdt::{collect_properties, FdtHeader};
use dtbpatch::patch::{check_patch, patch_property};
use dtbpatch::scan::{locate_blobs, select_candidate, SelectOptions, Selection};
use dtbpatch::{dump, hex_str, render_property_value, Result};

/// Find and patch a device tree blob embedded in a firmware or disk image.
///
/// Scans the image for FDT magic, validates each hit, picks the blob whose
/// target node still needs the patch, and overwrites its `status` property
/// in place.
#[derive(Parser, Debug)]
#[command(
    name = "dtbpatch",
    version,
    about = "Auto-find and patch a DTB status property inside an image"
)]
struct Cli {
    /// Path to the image file (e.g. sdcard.img)
    #[arg(long)]
    image: PathBuf,

    /// Node path whose status will be patched
    #[arg(long = "path", default_value = "/soc/mmc@50450000")]
    node_path: String,

    /// New status string
    #[arg(long, default_value = "okay")]
    status: String,

    /// Substring that must appear in the DTB's /model (case-sensitive)
    #[arg(long = "match-model", default_value = "FML13V03")]
    match_model: String,

    /// Case-insensitive substring a candidate's strings block must contain;
    /// may be repeated. Pass an empty value to accept everything.
    #[arg(long = "filter")]
    filters: Vec<String>,

    /// Ignore DTBs larger than this (bytes)
    #[arg(long = "max-dtb", default_value_t = dtbpatch::scan::DEFAULT_MAX_BLOB_SIZE)]
    max_dtb: usize,

    /// Scan and report candidates, do not modify the image
    #[arg(long)]
    dry_run: bool,

    /// List every property of the selected DTB and exit without patching
    #[arg(long)]
    inspect: bool,

    /// Write the original (pre-patch) DTB bytes here
    #[arg(long = "backup-dtb")]
    backup_dtb: Option<PathBuf>,

    /// Write the patched DTB bytes here
    #[arg(long = "out-dtb")]
    out_dtb: Option<PathBuf>,

    /// Write a best-effort .dts dump of the patched DTB here (needs `dtc`)
    #[arg(long = "dump-dts")]
    dump_dts: Option<PathBuf>,

    /// Quiet mode
    #[arg(short = 'q', long)]
    quiet: bool,

    /// Verbose output
    #[arg(short = 'v', long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn main() {
    let cli = Cli::parse();
    if let Err(e) = run(&cli) {
        eprintln!("dtbpatch: {e}");
        process::exit(1);
    }
}

fn run(cli: &Cli) -> Result<()> {
    if cli.dry_run || cli.inspect {
        let file = File::open(&cli.image)?;
        let mm = unsafe { Mmap::map(&file)? };
        let selection = scan_and_select(&mm, cli)?;
        report_selection(&selection, cli);
        export_blob(&cli.backup_dtb, selection.chosen().bytes(&mm))?;
        if cli.inspect {
            inspect_blob(selection.chosen().bytes(&mm));
        }
        if cli.dry_run {
            // Preflight the patch so a dry run fails with the same error a
            // real run would.
            check_patch(
                selection.chosen().bytes(&mm),
                &cli.node_path,
                "status",
                &cli.status,
            )?;
            if !cli.quiet {
                println!("Dry-run: patch applies; not modifying the image.");
            }
        }
        return Ok(());
    }

    let file = OpenOptions::new().read(true).write(true).open(&cli.image)?;
    let mut mm = unsafe { MmapMut::map_mut(&file)? };

    let selection = scan_and_select(&mm, cli)?;
    report_selection(&selection, cli);

    let (offset, total_size) = {
        let chosen = selection.chosen();
        (chosen.offset, chosen.total_size())
    };
    export_blob(&cli.backup_dtb, &mm[offset..offset + total_size])?;

    let blob = &mut mm[offset..offset + total_size];
    let outcome = patch_property(blob, &cli.node_path, "status", &cli.status)?;
    if !cli.quiet {
        println!(
            "{} status: {} -> {}",
            cli.node_path, outcome.old_value, outcome.new_value
        );
    }

    export_blob(&cli.out_dtb, &mm[offset..offset + total_size])?;
    if let Some(dts_path) = &cli.dump_dts {
        if let Err(e) = dump::dump_dts(&mm[offset..offset + total_size], dts_path) {
            eprintln!("dtbpatch: warning: dts dump failed: {e}");
        }
    }

    mm.flush()?;
    if !cli.quiet {
        println!("Patched image in-place.");
    }
    Ok(())
}

fn scan_and_select(buf: &[u8], cli: &Cli) -> Result<Selection> {
    let candidates = locate_blobs(buf, &cli.node_path, cli.max_dtb);
    if cli.verbose > 0 {
        eprintln!("{} raw candidate(s) before dedup/filtering", candidates.len());
    }

    let opts = SelectOptions {
        string_filters: cli
            .filters
            .iter()
            .filter(|f| !f.is_empty())
            .cloned()
            .collect(),
        model_match: match cli.match_model.as_str() {
            "" => None,
            m => Some(m.to_string()),
        },
        desired_status: cli.status.clone(),
    };
    select_candidate(buf, candidates, &opts)
}

fn report_selection(selection: &Selection, cli: &Cli) {
    if cli.quiet {
        return;
    }
    let chosen = selection.chosen();
    println!("Selected DTB at offset 0x{:08x}", chosen.offset);
    println!("model: {}", chosen.model);
    println!(
        "{} status: {}",
        cli.node_path,
        chosen.status.as_deref().unwrap_or("<missing>")
    );
    if cli.verbose > 0 {
        println!("sha256: {}", hex_str(&chosen.digest));
        println!("totalsize: {} bytes", chosen.total_size());
    }

    if selection.survivors.len() > 1 {
        println!("Other candidates:");
        for cand in selection.others().take(10) {
            println!(
                "  0x{:08x}  status={}  model={}",
                cand.offset,
                cand.status.as_deref().unwrap_or("<missing>"),
                cand.model
            );
        }
    }
}

fn inspect_blob(blob: &[u8]) {
    // The header already passed validation during the scan.
    let Ok(hdr) = FdtHeader::parse(blob) else {
        return;
    };
    for rec in collect_properties(blob, &hdr) {
        println!(
            "{}  {} = {}",
            rec.path,
            rec.name,
            render_property_value(&rec.value)
        );
    }
}

fn export_blob(path: &Option<PathBuf>, bytes: &[u8]) -> Result<()> {
    if let Some(path) = path {
        fs::write(path, bytes)?;
    }
    Ok(())
}
