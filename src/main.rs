use clap::*;
use clap_num::maybe_hex;
use exhume_aff4::{OpenOptions, StreamKind, Volume};
use log::{debug, error, info, LevelFilter};
use std::io::{self, Read, Write};

fn print_listing(volume: &Volume, json: bool) {
    let mut listing = volume.list_root();
    let entries = listing.read_dir(0).unwrap_or_default();
    if json {
        match serde_json::to_string_pretty(&entries) {
            Ok(out) => println!("{}", out),
            Err(e) => error!("Could not serialize the listing: {}", e),
        }
        return;
    }
    for entry in entries {
        println!("{:>16}  {}", entry.size, entry.name);
    }
}

fn dump(volume: &Volume, name: &str, offset: u64, size: Option<u64>) -> io::Result<u64> {
    let mut stream = volume.open_stream(name)?;
    match stream.kind() {
        StreamKind::Image => info!("'{}' is an ImageStream of {} bytes", name, stream.size()),
        StreamKind::Map => info!("'{}' is a Map of {} bytes", name, stream.size()),
    }

    // Streams are forward-only: reaching an offset means decoding up to it.
    if offset > 0 {
        let skipped = io::copy(&mut (&mut stream).take(offset), &mut io::sink())?;
        debug!("Skipped {} bytes", skipped);
        if skipped < offset {
            return Ok(0);
        }
    }

    let stdout = io::stdout();
    let mut out = stdout.lock();
    let written = match size {
        Some(size) => io::copy(&mut stream.take(size), &mut out)?,
        None => io::copy(&mut stream, &mut out)?,
    };
    out.flush()?;
    Ok(written)
}

fn process_file(
    file_path: &str,
    stream: Option<&String>,
    list: bool,
    json: bool,
    size: Option<u64>,
    offset: u64,
) {
    info!("Processing the file '{}' in 'aff4' format...", file_path);
    let volume = match Volume::open_path(file_path, OpenOptions::default()) {
        Ok(volume) => volume,
        Err(err) => {
            error!("{}", err);
            std::process::exit(1);
        }
    };
    debug!("------------------------------------------------------------");
    info!("Volume: {}", volume.uri());
    info!("Objects described: {}", volume.graph().len());
    debug!("------------------------------------------------------------");

    if list {
        print_listing(&volume, json);
        return;
    }

    let name = match stream.map(String::as_str).or_else(|| volume.names().next()) {
        Some(name) => name.to_string(),
        None => {
            error!("The container does not expose any image stream.");
            std::process::exit(1);
        }
    };

    if json {
        match volume.stat(&name) {
            Ok(entry) => match serde_json::to_string_pretty(&entry) {
                Ok(out) => println!("{}", out),
                Err(e) => error!("Could not serialize '{}': {}", name, e),
            },
            Err(err) => {
                error!("{}", err);
                std::process::exit(1);
            }
        }
        return;
    }

    match dump(&volume, &name, offset, size) {
        Ok(written) => info!("{} bytes written from '{}'", written, name),
        Err(err) => {
            error!("Could not read '{}': {}", name, err);
            std::process::exit(1);
        }
    }
}

fn main() {
    let matches = Command::new("exhume_aff4")
        .version(crate_version!())
        .author(crate_authors!())
        .about("Exhume the streams stored in an AFF4 forensic container.")
        .arg(
            Arg::new("body")
                .short('b')
                .long("body")
                .value_parser(value_parser!(String))
                .required(true)
                .help("The path to the AFF4 container."),
        )
        .arg(
            Arg::new("stream")
                .short('n')
                .long("stream")
                .value_parser(value_parser!(String))
                .required(false)
                .help("The stream to read (defaults to the first one listed)."),
        )
        .arg(
            Arg::new("list")
                .long("list")
                .action(ArgAction::SetTrue)
                .help("List the top-level streams of the container."),
        )
        .arg(
            Arg::new("json")
                .long("json")
                .action(ArgAction::SetTrue)
                .help("Print the listing or the stream metadata as JSON."),
        )
        .arg(
            Arg::new("size")
                .short('s')
                .long("size")
                .value_parser(maybe_hex::<u64>)
                .required(false)
                .help("The size (in bytes) to read. Reads to the end of the stream if omitted."),
        )
        .arg(
            Arg::new("offset")
                .short('o')
                .long("offset")
                .value_parser(maybe_hex::<u64>)
                .required(false)
                .help("Start reading at a specific offset."),
        )
        .arg(
            Arg::new("log_level")
                .short('l')
                .long("log-level")
                .value_parser(["error", "warn", "info", "debug", "trace"])
                .default_value("info")
                .help("Set the log verbosity level"),
        )
        .get_matches();

    let log_level_str = matches.get_one::<String>("log_level").unwrap();
    let level_filter = match log_level_str.as_str() {
        "error" => LevelFilter::Error,
        "warn" => LevelFilter::Warn,
        "info" => LevelFilter::Info,
        "debug" => LevelFilter::Debug,
        "trace" => LevelFilter::Trace,
        _ => LevelFilter::Info,
    };

    env_logger::Builder::new().filter_level(level_filter).init();

    let file_path = matches.get_one::<String>("body").unwrap();
    let stream = matches.get_one::<String>("stream");
    let list = matches.get_flag("list");
    let json = matches.get_flag("json");
    let size = matches.get_one::<u64>("size").copied();
    let offset = matches.get_one::<u64>("offset").copied().unwrap_or(0);

    process_file(file_path, stream, list, json, size, offset);
}
