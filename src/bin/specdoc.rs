use clap::{Parser, Subcommand};
use serde::Serialize;
use specdoc::outline::{extract, flatten};
use specdoc::{parse, sanitize, serialize};
use std::fs;
use std::path::PathBuf;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the heading outline of a markup file
    Outline {
        file: PathBuf,
        #[arg(long)]
        json: bool,
    },
    /// Repair a markup file and print the sanitized form
    Sanitize { file: PathBuf },
    /// Verify that a markup file survives a parse/serialize round trip
    Check { file: PathBuf },
}

#[derive(Serialize)]
struct OutlineLine {
    section_id: String,
    title: String,
    level: u8,
}

fn main() {
    let cli = Cli::parse();

    match &cli.command {
        Commands::Outline { file, json } => outline_command(file, *json),
        Commands::Sanitize { file } => sanitize_command(file),
        Commands::Check { file } => check_command(file),
    }
}

fn read_input(file: &PathBuf) -> String {
    match fs::read_to_string(file) {
        Ok(text) => text,
        Err(err) => {
            eprintln!("Error: {err}");
            std::process::exit(1);
        }
    }
}

fn parse_input(file: &PathBuf) -> specdoc::Document {
    let text = read_input(file);
    match parse(&text).or_else(|_| parse(&sanitize(&text))) {
        Ok(document) => document,
        Err(err) => {
            eprintln!("Error: {err}");
            std::process::exit(1);
        }
    }
}

fn outline_command(file: &PathBuf, json: bool) {
    let document = parse_input(file);
    let outline = extract(&document);
    let lines: Vec<OutlineLine> = flatten(&outline)
        .into_iter()
        .map(|item| OutlineLine {
            section_id: item.section_id.clone(),
            title: item.title.clone(),
            level: item.level.get(),
        })
        .collect();

    if json {
        let output = serde_json::json!({ "outline": lines });
        match serde_json::to_string_pretty(&output) {
            Ok(text) => println!("{text}"),
            Err(err) => {
                eprintln!("Error: {err}");
                std::process::exit(1);
            }
        }
    } else {
        for line in lines {
            let indent = "  ".repeat(usize::from(line.level.saturating_sub(1)));
            println!("{indent}{} [{}]", line.title, line.section_id);
        }
    }
}

fn sanitize_command(file: &PathBuf) {
    let text = read_input(file);
    println!("{}", sanitize(&text));
}

fn check_command(file: &PathBuf) {
    let text = read_input(file);
    let document = match parse(&text) {
        Ok(document) => document,
        Err(err) => {
            eprintln!("Parse failed: {err}");
            std::process::exit(1);
        }
    };
    let reparsed = match parse(&serialize(&document)) {
        Ok(reparsed) => reparsed,
        Err(err) => {
            eprintln!("Round trip failed: {err}");
            std::process::exit(1);
        }
    };
    if reparsed != document {
        eprintln!("Round trip failed: structural mismatch");
        std::process::exit(1);
    }
    println!("OK");
}
