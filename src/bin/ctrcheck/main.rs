// main.rs from ctrcheck (c) 2025 ctrcheck Contributors
// https://github.com/ctrcheck/ctrcheck
//
// Base for the ctrcheck CLI that handles argument parsing and directs
// execution to the matching check.

use std::fs::{self, File};
use std::io::BufReader;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use ctrcheck::title::cert::CertificateStore;
use ctrcheck::title::cia::{self, Cia};
use ctrcheck::title::smdh::Smdh;
use ctrcheck::title::ticket::{self, TicketInfo};
use ctrcheck::title::tmd::{self, TmdContent, TmdInfo};

#[derive(Parser)]
#[command(version, about, long_about = None)]
struct Cli {
    /// The path to the certificate asset blob (six concatenated Nintendo
    /// certificates)
    #[arg(short, long)]
    certs: PathBuf,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
#[command(arg_required_else_help = true)]
enum Commands {
    /// Check CIA files
    Cia {
        /// The paths to one or more CIA files
        #[arg(required = true)]
        input: Vec<PathBuf>,
    },
    /// Check Ticket files
    Ticket {
        /// The paths to one or more Ticket files
        #[arg(required = true)]
        input: Vec<PathBuf>,
    },
    /// Check TMD files
    Tmd {
        /// The paths to one or more TMD files
        #[arg(required = true)]
        input: Vec<PathBuf>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let asset = fs::read(&cli.certs)
        .with_context(|| format!("Unable to read certificate asset \"{}\".", cli.certs.display()))?;
    let store = CertificateStore::from_asset(&asset)
        .with_context(|| format!("Certificate asset \"{}\" is not valid.", cli.certs.display()))?;

    match &cli.command {
        Commands::Cia { input } => {
            for path in input {
                let cia = cia::check_cia(open(path)?, &store)
                    .with_context(|| format!("Invalid CIA file \"{}\".", path.display()))?;
                println!("{}:", path.display());
                print_cia_info(&cia);
            }
        }
        Commands::Ticket { input } => {
            for path in input {
                let info = ticket::check_ticket(open(path)?, &store)
                    .with_context(|| format!("Invalid Ticket file \"{}\".", path.display()))?;
                println!("{}:", path.display());
                print_ticket_info(&info);
            }
        }
        Commands::Tmd { input } => {
            for path in input {
                let info = tmd::check_tmd(open(path)?, &store)
                    .with_context(|| format!("Invalid TMD file \"{}\".", path.display()))?;
                println!("{}:", path.display());
                print_tmd_info(&info);
            }
        }
    }
    Ok(())
}

fn open(path: &Path) -> Result<BufReader<File>> {
    let file =
        File::open(path).with_context(|| format!("Unable to open file \"{}\".", path.display()))?;
    Ok(BufReader::new(file))
}

fn signature_status(legit: bool) -> &'static str {
    if legit {
        "Valid (Signed by Nintendo)"
    } else {
        "Invalid"
    }
}

fn print_ticket_info(info: &TicketInfo) {
    println!("Ticket Info");
    println!("  Title ID: {}", info.title_id);
    println!("  Ticket ID: {}", info.ticket_id);
    println!("  Console ID: {}", info.console_id);
    println!("  Title Key (Encrypted): {}", hex::encode(info.title_key.encrypted).to_uppercase());
    println!("  Title Key (Decrypted): {}", hex::encode(info.title_key.decrypted).to_uppercase());
    println!("  Signature: {}", signature_status(info.legit));
    println!("  Certs Trailer: {}", info.certs_trailer);
}

fn print_content_record(content: &TmdContent, missing: Option<bool>) {
    println!("    Content Index: {}", content.index);
    println!("      Content ID: {}", content.id);
    println!("      Content Type: {:04X}", content.content_type.bits());
    println!("      Content Size: {} bytes", content.size);
    println!("      Content Hash: {}", hex::encode(content.hash));
    if let Some(missing) = missing {
        println!("      Missing: {}", missing);
    }
}

fn print_tmd_info(info: &TmdInfo) {
    println!("TMD Info");
    println!("  Title ID: {}", info.title_id);
    println!("  Title Version: {}", info.title_version);
    println!("  Signature: {}", signature_status(info.legit));
    println!("  Certs Trailer: {}", info.certs_trailer);
    println!("\nContent Info");
    println!("  Total Contents: {}", info.contents.len());
    println!("  Content Records:");
    for content in &info.contents {
        print_content_record(content, None);
    }
}

fn print_icon_info(icon: &Smdh) {
    println!("\nIcon Info");
    println!("  Short Description: {}", icon.title.short_description);
    println!("  Long Description: {}", icon.title.long_description);
    println!("  Publisher: {}", icon.title.publisher);
    let regions: Vec<String> = icon.regions.iter().map(|region| region.to_string()).collect();
    println!("  Regions: {}", regions.join(", "));
}

fn print_cia_info(cia: &Cia) {
    println!("CIA Info");
    println!("  Title ID: {}", cia.title_id);
    println!("  Legit: {}", cia.legit);
    println!("  Complete: {}", cia.complete);
    println!("  Has Meta: {}", cia.meta);
    println!("\nTicket Info");
    println!("  Ticket ID: {}", cia.ticket.ticket_id);
    println!("  Console ID: {}", cia.ticket.console_id);
    println!("  Title Key (Encrypted): {}", hex::encode(cia.ticket.title_key.encrypted).to_uppercase());
    println!("  Title Key (Decrypted): {}", hex::encode(cia.ticket.title_key.decrypted).to_uppercase());
    println!("  Signature: {}", signature_status(cia.ticket.legit));
    println!("\nTMD Info");
    println!("  Title Version: {}", cia.tmd.title_version);
    println!("  Signature: {}", signature_status(cia.tmd.legit));
    println!("\nContent Info");
    println!("  Total Contents: {}", cia.contents.len());
    println!("  Content Records:");
    for content in &cia.contents {
        print_content_record(&content.content, Some(content.missing));
    }
    if let Some(icon) = &cia.icon {
        print_icon_info(icon);
    }
}
