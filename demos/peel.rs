use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use camino::Utf8PathBuf;
use log::*;
use memmap2::Mmap;
use rayon::prelude::*;
use structopt::*;

use apple_peeler::locate::*;
use apple_peeler::DictionaryDocument;

#[derive(Debug, StructOpt)]
#[structopt(name = "peel", about = "Extracts XML from Apple Dictionary files")]
struct Opt {
    /// Pass multiple times for additional verbosity (info, debug, trace)
    #[structopt(short, long, parse(from_occurrences))]
    verbosity: usize,

    /// The root directory of the macOS dictionaries.
    #[structopt(
        long,
        env = "DICT_BASE",
        default_value = "/System/Library/AssetsV2/com_apple_MobileAsset_DictionaryServices_dictionaryOSX/"
    )]
    base: Utf8PathBuf,

    /// The directory to place extracted XML files. (Prints to stdout otherwise.)
    #[structopt(short, long)]
    out: Option<PathBuf>,

    /// The dictionary to extract, or "all". Pass multiple times for several.
    #[structopt(short, long = "dictionary", default_value = "all")]
    dictionaries: Vec<String>,

    /// Don't require chunks to match their declared sizes exactly.
    #[structopt(long)]
    lax: bool,

    /// Indent the XML, one element per line.
    #[structopt(long)]
    format_xml: bool,

    /// Lists the dictionaries found instead of extracting them.
    #[structopt(short = "n", long)]
    dry_run: bool,
}

fn main() -> Result<()> {
    let args = Opt::from_args();

    let mut errlog = stderrlog::new();
    errlog.verbosity(args.verbosity + 1);
    errlog.init()?;

    let dictionaries = find_dictionaries(&args.base)
        .with_context(|| format!("Couldn't look for dictionaries in {}", args.base))?;
    let selection = Selection::from_names(args.dictionaries);
    for name in selection.missing(&dictionaries) {
        warn!("No dictionary named {}", name);
    }
    let selected: Vec<&Dictionary> = dictionaries
        .iter()
        .filter(|d| selection.selects(&d.name))
        .collect();

    if args.dry_run {
        for dictionary in &selected {
            println!("{}\t{}", dictionary.name, dictionary.path);
        }
        return Ok(());
    }

    let strict = !args.lax;
    let pretty = args.format_xml;
    let failures = match &args.out {
        Some(out) => selected
            .par_iter()
            .filter(|d| !report(d, extract_to(d, out, strict, pretty)))
            .count(),
        None => selected
            .iter()
            .filter(|d| !report(d, print(d, strict, pretty)))
            .count(),
    };
    if failures != 0 {
        bail!("{} of {} dictionaries failed", failures, selected.len());
    }
    Ok(())
}

/// Logs the outcome of extracting a dictionary, returning true if it went well.
/// One bad dictionary shouldn't stop the others.
fn report(dictionary: &Dictionary, result: Result<usize>) -> bool {
    match result {
        Ok(entry_count) => {
            info!("Processed {}: {} entries", dictionary.name, entry_count);
            true
        }
        Err(e) => {
            error!("Couldn't extract {}: {:?}", dictionary.name, e);
            false
        }
    }
}

fn read_document(dictionary: &Dictionary, strict: bool) -> Result<DictionaryDocument> {
    let path = dictionary
        .body_data()
        .with_context(|| format!("No {} in {}", BODY_DATA, dictionary.path))?;
    debug!("Memory mapping {}", path);
    let body_file = File::open(path).with_context(|| format!("Couldn't open {}", path))?;
    let mapping = unsafe { Mmap::map(&body_file).with_context(|| format!("Couldn't mmap {}", path))? };
    DictionaryDocument::decode(&mapping, strict).with_context(|| format!("Couldn't decode {}", path))
}

fn write_document<W: Write>(document: &DictionaryDocument, out: W, pretty: bool) -> io::Result<()> {
    if pretty {
        document.write_pretty_xml(out)
    } else {
        document.write_xml(out)
    }
}

fn extract_to(dictionary: &Dictionary, out: &Path, strict: bool, pretty: bool) -> Result<usize> {
    let document = read_document(dictionary, strict)?;
    let xml_path = out.join(format!("{}.xml", dictionary.name));
    debug!("Writing {}", xml_path.display());
    let xml_file = File::create(&xml_path)
        .with_context(|| format!("Couldn't create {}", xml_path.display()))?;
    write_document(&document, BufWriter::new(xml_file), pretty)
        .with_context(|| format!("Couldn't write {}", xml_path.display()))?;
    Ok(document.len())
}

fn print(dictionary: &Dictionary, strict: bool, pretty: bool) -> Result<usize> {
    let document = read_document(dictionary, strict)?;
    let stdout = io::stdout();
    let mut stdout = stdout.lock();
    write_document(&document, &mut stdout, pretty)?;
    writeln!(stdout)?;
    Ok(document.len())
}
