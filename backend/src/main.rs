//! Sheetmap CLI - map and transform spreadsheet tables
//!
//! # Main Commands
//!
//! ```bash
//! sheetmap serve                                  # Start HTTP server (port 3000)
//! sheetmap transform plant.xlsx -c mapping.json   # Transform to CSV on stdout
//! sheetmap template list                          # Manage mapping templates
//! sheetmap project list                           # Manage projects
//! ```
//!
//! # Inspection Commands
//!
//! ```bash
//! sheetmap headers plant.xlsx          # Show detected header rows and leaf headers
//! sheetmap parse plant.csv             # Columns and data rows as JSON
//! sheetmap detect-group plant.csv      # Guess the category column
//! sheetmap pivot plant.csv --group Base --value Description --method previous
//! sheetmap suggest plant.csv           # Ask for mapping suggestions
//! ```

use clap::{Parser, Subcommand};
use sheetmap::export::{export_bytes, ExportFormat};
use sheetmap::store::ProjectInsert;
use sheetmap::transform::headers::DEFAULT_MAX_HEADER_ROWS;
use sheetmap::transform::pivot::pivot_column_defs;
use sheetmap::{
    build_table, derive_leaf_headers, detect_group_column_index, detect_header_rows, load_sheet, pivot_by_group,
    transform_file, AiClient, AppConfig, PivotMethod, ProjectStore, SourceTable, TemplateRegistry,
    TransformConfig, TransformOptions, TransformedTable,
};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

type CliResult = Result<(), Box<dyn std::error::Error>>;

#[derive(Parser)]
#[command(name = "sheetmap")]
#[command(about = "Map spreadsheet columns onto a target schema with base-aware row rules", long_about = None)]
struct Cli {
    /// Data directory (templates, projects, session)
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show detected header rows and leaf headers
    Headers {
        /// Input CSV/XLSX file
        input: PathBuf,

        /// Maximum number of header rows
        #[arg(long)]
        header_rows: Option<usize>,
    },

    /// Parse a sheet and output its columns and data rows as JSON
    Parse {
        /// Input CSV/XLSX file
        input: PathBuf,

        /// Maximum number of header rows
        #[arg(long)]
        header_rows: Option<usize>,

        /// Output file (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Full pipeline: sheet -> pivots -> base rules -> export
    Transform {
        /// Input CSV/XLSX file
        input: PathBuf,

        /// Transform configuration (JSON)
        #[arg(short, long)]
        config: PathBuf,

        /// Output file (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// csv, xlsx or json (default: from output extension, else csv)
        #[arg(short, long)]
        format: Option<String>,

        /// Maximum number of header rows
        #[arg(long)]
        header_rows: Option<usize>,

        /// Skip the column-method pivot stage
        #[arg(long)]
        no_pivots: bool,

        /// Record the run on this project
        #[arg(long)]
        project: Option<String>,
    },

    /// Pivot a value column by the distinct values of a group column
    Pivot {
        /// Input CSV/XLSX file
        input: PathBuf,

        /// Group column (id, header or 1-based position)
        #[arg(long)]
        group: String,

        /// Value column (id, header or 1-based position)
        #[arg(long)]
        value: String,

        /// self, previous, after or parent
        #[arg(short, long, default_value = "self")]
        method: PivotMethod,

        /// Parent group label for the parent method
        #[arg(long)]
        parent: Option<String>,

        /// Output file (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Guess which column holds the row categories
    DetectGroup {
        /// Input CSV/XLSX file
        input: PathBuf,

        /// Column to skip (id, header or 1-based position)
        #[arg(long)]
        exclude: Option<String>,
    },

    /// Ask the suggestion service for mappings of a sheet's columns
    Suggest {
        /// Input CSV/XLSX file
        input: PathBuf,
    },

    /// Start HTTP server
    Serve {
        /// Port to listen on (default: SHEETMAP_PORT or 3000)
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Manage mapping templates
    Template {
        #[command(subcommand)]
        action: TemplateAction,
    },

    /// Manage projects
    Project {
        #[command(subcommand)]
        action: ProjectAction,
    },
}

#[derive(Subcommand)]
enum TemplateAction {
    /// List all stored templates
    List,

    /// Import a transform config JSON file as template
    Import {
        /// Config JSON file to import
        file: PathBuf,
        /// Name for the template
        #[arg(short, long)]
        name: Option<String>,
    },

    /// Show details of a template
    Show {
        /// Template ID
        id: String,
    },

    /// Delete a template
    Delete {
        /// Template ID
        id: String,
    },

    /// Use a specific template to transform a sheet
    Use {
        /// Template ID
        id: String,
        /// Input CSV/XLSX file
        input: PathBuf,
        /// Output file (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// csv, xlsx or json
        #[arg(short, long)]
        format: Option<String>,
    },

    /// List templates compatible with a sheet's headers
    Match {
        /// Input CSV/XLSX file
        input: PathBuf,
    },
}

#[derive(Subcommand)]
enum ProjectAction {
    /// List projects, newest first
    List,

    /// Create a project
    Create {
        name: String,
        #[arg(short, long)]
        description: Option<String>,
    },

    /// Show a project with its files, exports and activity
    Show { id: String },

    /// Delete a project
    Delete { id: String },
}

#[tokio::main]
async fn main() {
    // Load .env file (if present)
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    let config = AppConfig::from_env().with_data_dir(cli.data_dir);

    let result = match cli.command {
        Commands::Headers { input, header_rows } => cmd_headers(&input, header_rows),

        Commands::Parse {
            input,
            header_rows,
            output,
        } => cmd_parse(&input, header_rows, output.as_deref()),

        Commands::Transform {
            input,
            config: config_path,
            output,
            format,
            header_rows,
            no_pivots,
            project,
        } => {
            let options = TransformOptions {
                header_rows,
                skip_pivots: no_pivots,
            };
            cmd_transform(
                &config,
                &input,
                &config_path,
                output.as_deref(),
                format.as_deref(),
                &options,
                project.as_deref(),
            )
        }

        Commands::Pivot {
            input,
            group,
            value,
            method,
            parent,
            output,
        } => cmd_pivot(&input, &group, &value, method, parent.as_deref(), output.as_deref()),

        Commands::DetectGroup { input, exclude } => cmd_detect_group(&input, exclude.as_deref()),

        Commands::Suggest { input } => cmd_suggest(&config, &input).await,

        Commands::Serve { port } => cmd_serve(config.with_port(port)).await,

        Commands::Template { action } => cmd_template(&config, action),

        Commands::Project { action } => cmd_project(&config, action),
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn read_table(input: &Path, header_rows: Option<usize>) -> Result<SourceTable, Box<dyn std::error::Error>> {
    let raw = load_sheet(input)?;
    Ok(build_table(&raw, header_rows))
}

/// Column index from an id, a header (exact, then case-insensitive) or a 1-based position.
fn resolve_column(table: &SourceTable, reference: &str) -> Result<usize, Box<dyn std::error::Error>> {
    let cols = &table.source_columns;
    cols.iter()
        .position(|c| c.id == reference || c.name == reference)
        .or_else(|| {
            cols.iter()
                .position(|c| c.name.to_lowercase() == reference.to_lowercase())
        })
        .or_else(|| {
            reference
                .parse::<usize>()
                .ok()
                .filter(|&n| n >= 1 && n <= cols.len())
                .map(|n| n - 1)
        })
        .ok_or_else(|| format!("Unknown column: {}", reference).into())
}

fn cmd_headers(input: &Path, header_rows: Option<usize>) -> CliResult {
    let raw = load_sheet(input)?;
    let max = header_rows.unwrap_or(DEFAULT_MAX_HEADER_ROWS);

    let headers = detect_header_rows(&raw.rows, max);
    eprintln!("{} header row(s):", headers.len());
    for row in &headers {
        eprintln!("   | {}", row.join(" | "));
    }

    println!("Leaf headers:");
    for (i, name) in derive_leaf_headers(&raw.rows, max).iter().enumerate() {
        println!("  [{:2}] {}", i + 1, name);
    }
    Ok(())
}

fn cmd_parse(input: &Path, header_rows: Option<usize>, output: Option<&Path>) -> CliResult {
    eprintln!("Parsing: {}", input.display());

    let raw = load_sheet(input)?;
    eprintln!("   Encoding: {}", raw.encoding);
    if let Some(d) = raw.delimiter {
        eprintln!("   Delimiter: '{}'", format_delimiter(d));
    }

    let table = build_table(&raw, header_rows);
    let names: Vec<&str> = table.source_columns.iter().map(|c| c.name.as_str()).collect();
    eprintln!("   Columns: {}", names.join(", "));
    eprintln!("Parsed {} data rows", table.rows.len());

    let json = serde_json::to_string_pretty(&table)?;
    write_output(json.as_bytes(), output)
}

#[allow(clippy::too_many_arguments)]
fn cmd_transform(
    config: &AppConfig,
    input: &Path,
    config_path: &Path,
    output: Option<&Path>,
    format: Option<&str>,
    options: &TransformOptions,
    project: Option<&str>,
) -> CliResult {
    eprintln!("Processing: {}", input.display());

    let transform_config = TransformConfig::load(config_path)?;
    let result = transform_file(input, &transform_config, options)?;

    eprintln!("   Encoding: {}", result.source_info.encoding);
    eprintln!("   Rows: {}", result.source_info.row_count);
    eprintln!("   Columns: {}", result.source_info.headers.join(", "));
    if !result.pivot_columns.is_empty() {
        let names: Vec<&str> = result.pivot_columns.iter().map(|p| p.name.as_str()).collect();
        eprintln!("   Pivot columns: {}", names.join(", "));
    }
    eprintln!("\nKept {} rows", result.result.rows.len());

    let written = write_table(&result.result, output, format, input)?;

    if let Some(project_id) = project {
        let store = ProjectStore::with_dir(config.projects_dir());
        let file_name = input.file_name().and_then(|n| n.to_str()).unwrap_or("input");
        store.add_project_file(project_id, file_name, Some(result.source_info.row_count), None)?;
        if let Some(out) = output {
            store.add_project_export(project_id, &out.display().to_string(), Some(format!("{} B", written)), None)?;
        }
        store.add_project_activity(
            project_id,
            "transform",
            Some(format!("{} -> {} rows", file_name, result.result.rows.len())),
            None,
        )?;
        store.update_project(
            project_id,
            sheetmap::store::ProjectUpdate {
                stats: Some(result.stats),
                ..Default::default()
            },
        )?;
        eprintln!("   Recorded on project {}", project_id);
    }

    eprintln!("\nDone!");
    Ok(())
}

/// Encode `table` and write it to `output` or stdout. Returns the byte count.
fn write_table(table: &TransformedTable, output: Option<&Path>, format: Option<&str>, input: &Path) -> Result<usize, Box<dyn std::error::Error>> {
    let format = match (format, output) {
        (Some(f), _) => f.parse()?,
        (None, Some(p)) => ExportFormat::from_path(p).unwrap_or(ExportFormat::Csv),
        (None, None) => ExportFormat::Csv,
    };
    if format == ExportFormat::Xlsx && output.is_none() {
        return Err("XLSX output needs --output".into());
    }

    let sheet = input.file_stem().and_then(|s| s.to_str()).unwrap_or("Transformed");
    let bytes = export_bytes(table, format, sheet)?;
    write_output(&bytes, output)?;
    Ok(bytes.len())
}

fn cmd_pivot(
    input: &Path,
    group: &str,
    value: &str,
    method: PivotMethod,
    parent: Option<&str>,
    output: Option<&Path>,
) -> CliResult {
    let table = read_table(input, None)?;
    let group_idx = resolve_column(&table, group)?;
    let value_idx = resolve_column(&table, value)?;

    if method == PivotMethod::Parent && parent.is_none() {
        eprintln!("Warning: parent method without --parent leaves pivot cells empty");
    }

    let pivot = pivot_by_group(&table.rows, group_idx, value_idx, method, parent);
    let defs = pivot_column_defs(&pivot.new_columns);
    eprintln!(
        "Pivoted {} by {} ({}): {} new column(s)",
        table.source_columns[value_idx].name,
        table.source_columns[group_idx].name,
        method,
        defs.len()
    );

    let mut wtr = csv::WriterBuilder::new().flexible(true).from_writer(Vec::new());
    let header = table
        .source_columns
        .iter()
        .map(|c| c.name.as_str())
        .chain(defs.iter().map(|d| d.name.as_str()));
    wtr.write_record(header)?;
    for row in &pivot.transformed_rows {
        wtr.write_record(row)?;
    }
    let bytes = wtr.into_inner().map_err(|e| e.to_string())?;
    write_output(&bytes, output)
}

fn cmd_detect_group(input: &Path, exclude: Option<&str>) -> CliResult {
    let table = read_table(input, None)?;
    let exclude = exclude.map(|e| resolve_column(&table, e)).transpose()?;

    match detect_group_column_index(&table.rows, &table.source_columns, exclude) {
        Some(i) => {
            let col = &table.source_columns[i];
            println!("{} ({}, column {})", col.name, col.id, i + 1);
        }
        None => {
            eprintln!("No category column found");
        }
    }
    Ok(())
}

async fn cmd_suggest(config: &AppConfig, input: &Path) -> CliResult {
    let table = read_table(input, None)?;
    let columns: Vec<String> = table.source_columns.iter().map(|c| c.name.clone()).collect();

    eprintln!("Asking for suggestions on {} columns...", columns.len());
    let client = AiClient::from_config(config)?;
    let suggestions = client.suggest_mappings(&columns, None).await?;

    if suggestions.is_empty() {
        eprintln!("No usable suggestions returned");
    }
    println!("{}", serde_json::to_string_pretty(&suggestions)?);
    Ok(())
}

async fn cmd_serve(config: AppConfig) -> CliResult {
    sheetmap::server::start_server(config).await
}

fn format_delimiter(d: char) -> String {
    match d {
        '\t' => "\\t".to_string(),
        c => c.to_string(),
    }
}

fn write_output(content: &[u8], path: Option<&Path>) -> CliResult {
    match path {
        Some(p) => {
            fs::write(p, content)?;
            eprintln!("Output written to: {}", p.display());
        }
        None => {
            let mut stdout = std::io::stdout().lock();
            stdout.write_all(content)?;
            stdout.write_all(b"\n")?;
        }
    }
    Ok(())
}

fn cmd_template(config: &AppConfig, action: TemplateAction) -> CliResult {
    let mut registry = TemplateRegistry::with_dir(config.templates_dir());

    match action {
        TemplateAction::List => {
            let templates = registry.list();
            if templates.is_empty() {
                eprintln!("No templates stored yet.");
                eprintln!("   Use 'sheetmap template import <file>' to add one.");
                return Ok(());
            }

            eprintln!("Stored templates ({}):\n", templates.len());
            for t in templates {
                println!("  {} ({})", t.name, t.id);
                if let Some(ref category) = t.category {
                    println!("     Category: {}", category);
                }
                println!("     Columns: {}", t.source_columns.join(", "));
                println!("     Success rate: {:.0}%", t.success_rate * 100.0);
                println!("     Uses: {}", t.use_count);
                if let Some(ref last) = t.last_used {
                    println!("     Last used: {}", last);
                }
                println!();
            }
        }

        TemplateAction::Import { file, name } => {
            eprintln!("Importing template from: {}", file.display());
            let id = registry.import(&file, name.as_deref())?;
            eprintln!("Template saved with ID: {}", id);
        }

        TemplateAction::Show { id } => {
            let t = registry.get(&id)?;
            println!("Template: {} ({})\n", t.name, t.id);
            if let Some(ref description) = t.description {
                println!("{}\n", description);
            }
            println!("Source columns: {}", t.source_columns.join(", "));
            println!("Created: {}", t.created_at);
            println!("Success rate: {:.0}%", t.success_rate * 100.0);
            println!("Uses: {}", t.use_count);
            println!("\nConfig:");
            println!("{}", serde_json::to_string_pretty(&t.config)?);
        }

        TemplateAction::Delete { id } => {
            registry.delete(&id)?;
            eprintln!("Template deleted: {}", id);
        }

        TemplateAction::Use {
            id,
            input,
            output,
            format,
        } => {
            let template = registry.get(&id)?.clone();
            eprintln!("Using template: {} ({})", template.name, template.id);

            let result = transform_file(&input, &template.config, &TransformOptions::default());
            registry.update_stats(&id, matches!(&result, Ok(r) if !r.result.rows.is_empty()))?;
            let result = result?;

            eprintln!("   Kept {} of {} rows", result.result.rows.len(), result.source_info.row_count);
            write_table(&result.result, output.as_deref(), format.as_deref(), &input)?;
        }

        TemplateAction::Match { input } => {
            let table = read_table(&input, None)?;
            let headers: Vec<String> = table.source_columns.iter().map(|c| c.name.clone()).collect();
            let compatible = registry.find_compatible(&headers);

            if compatible.is_empty() {
                eprintln!("No compatible templates found");
            }
            for (t, score) in compatible {
                println!(
                    "  {} ({}) - match {:.0}%, success rate {:.0}%",
                    t.name,
                    t.id,
                    score * 100.0,
                    t.success_rate * 100.0
                );
            }
        }
    }

    Ok(())
}

fn cmd_project(config: &AppConfig, action: ProjectAction) -> CliResult {
    let store = ProjectStore::with_dir(config.projects_dir());

    match action {
        ProjectAction::List => {
            let projects = store.list_projects()?;
            if projects.is_empty() {
                eprintln!("No projects yet.");
                return Ok(());
            }
            for p in projects {
                println!("  {} ({}) - {:?}", p.name, p.id, p.status);
                println!(
                    "     {} columns mapped, {} rules, {} rows processed",
                    p.stats.columns_mapped, p.stats.rules_applied, p.stats.rows_processed
                );
            }
        }

        ProjectAction::Create { name, description } => {
            let project = store.create_project(ProjectInsert {
                name,
                description,
                settings: None,
            })?;
            eprintln!("Project created with ID: {}", project.id);
        }

        ProjectAction::Show { id } => {
            let detail = store.get_project_detail(&id)?;
            println!("{}", serde_json::to_string_pretty(&detail)?);
        }

        ProjectAction::Delete { id } => {
            store.delete_project(&id)?;
            eprintln!("Project deleted: {}", id);
        }
    }

    Ok(())
}
