use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{Context, bail};
use arrow::util::pretty::pretty_format_batches;
use clap::{Args, Parser, Subcommand, ValueEnum};
use log::{info, warn};

use cohort_reader::derive::{
    combine_notes, complaint_diagnosis, keyword_cohort, label_lab_results, length_of_stay,
    model_input, restrict_to_subjects, top_diagnoses, visit_trend, write_snapshot,
};
use cohort_reader::derive::KeywordCohort;
use cohort_reader::reader::load_extracts;
use cohort_reader::{
    CohortDefinition, CohortFilters, CohortPipeline, CohortRequest, Diagnostics, DirectorySource,
    ExtractKind, ExtractSet, ExtractSource, ExtractSpec, PipelineConfig, RecordBatch, SortSpec, SqliteStore,
};

#[derive(Debug, Parser)]
#[command(version, about = "Build patient cohort views from clinical extracts")]
struct Cli {
    /// Pipeline configuration file (TOML)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Extract directory, overriding the configuration
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Read extracts from a SQLite database instead of a directory
    #[arg(long, global = true)]
    sqlite: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Print one page of a cohort view
    View {
        #[command(flatten)]
        cohort: CohortArgs,
        #[arg(long, default_value_t = 1)]
        page: usize,
        #[arg(long)]
        page_size: Option<usize>,
        /// Print totals and messages as JSON instead of a table
        #[arg(long)]
        json: bool,
    },
    /// Print the choices available for each filter as JSON
    Options {
        #[command(flatten)]
        cohort: CohortArgs,
    },
    /// Write the whole filtered cohort view to a CSV or Parquet file
    Snapshot {
        #[command(flatten)]
        cohort: CohortArgs,
        #[arg(long, short)]
        output: PathBuf,
    },
    /// Build a derived table from the raw extracts
    Derive {
        #[arg(value_enum)]
        product: Product,
        /// Directory the derived tables are written to
        #[arg(long, short, default_value = "derived")]
        output: PathBuf,
        /// Diagnosis title keywords selecting the cohort
        #[arg(long = "keyword", default_value = "depress")]
        keywords: Vec<String>,
        #[arg(long, value_enum, default_value_t = OutputFormat::Csv)]
        format: OutputFormat,
    },
    /// Import CSV files into a SQLite database
    Import {
        /// Database file to create or extend
        #[arg(long)]
        db: PathBuf,
        /// CSV files; each goes into the table named after its file stem
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
}

#[derive(Debug, Args)]
struct CohortArgs {
    /// Preset cohort: hospital, emergency or combined
    #[arg(long, default_value = "combined")]
    cohort: String,
    /// Cohort definition file (TOML), replacing the preset
    #[arg(long)]
    definition: Option<PathBuf>,
    #[arg(long)]
    gender: Option<String>,
    #[arg(long)]
    min_age: Option<f64>,
    #[arg(long)]
    max_age: Option<f64>,
    #[arg(long = "icd-code")]
    icd_codes: Vec<String>,
    #[arg(long = "icd-title")]
    icd_titles: Vec<String>,
    #[arg(long)]
    icd_search: Option<String>,
    #[arg(long)]
    admission_type: Option<String>,
    #[arg(long)]
    admission_location: Option<String>,
    #[arg(long)]
    discharge_location: Option<String>,
    #[arg(long)]
    chief_complaint: Option<String>,
    #[arg(long = "disposition")]
    dispositions: Vec<String>,
    /// Sort by this column
    #[arg(long)]
    sort: Option<String>,
    #[arg(long, requires = "sort")]
    descending: bool,
    /// Include triage vital signs
    #[arg(long)]
    vitals: bool,
}

impl CohortArgs {
    fn definition(&self) -> anyhow::Result<CohortDefinition> {
        match &self.definition {
            Some(path) => CohortDefinition::from_toml_file(path)
                .with_context(|| format!("reading cohort definition {}", path.display())),
            None => Ok(CohortDefinition::preset(&self.cohort)?),
        }
    }

    fn request(&self) -> CohortRequest {
        let filters = CohortFilters {
            gender: self.gender.clone(),
            age_range: match (self.min_age, self.max_age) {
                (None, None) => None,
                (min, max) => Some(cohort_reader::AgeRange::new(
                    min.unwrap_or(0.0),
                    max.unwrap_or(f64::MAX),
                )),
            },
            icd_codes: self.icd_codes.clone(),
            icd_titles: self.icd_titles.clone(),
            icd_search: self.icd_search.clone(),
            admission_type: self.admission_type.clone(),
            admission_location: self.admission_location.clone(),
            discharge_location: self.discharge_location.clone(),
            chief_complaint: self.chief_complaint.clone(),
            dispositions: self.dispositions.clone(),
        };

        let mut request = CohortRequest::new(filters).with_vitals(self.vitals);
        if let Some(column) = &self.sort {
            request = request.with_sort(if self.descending {
                SortSpec::descending(column)
            } else {
                SortSpec::ascending(column)
            });
        }
        request
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Product {
    TopDiagnoses,
    LengthOfStay,
    VisitTrend,
    ComplaintDiagnosis,
    KeywordCohort,
    ModelInput,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Csv,
    Parquet,
}

impl OutputFormat {
    const fn extension(self) -> &'static str {
        match self {
            Self::Csv => "csv",
            Self::Parquet => "parquet",
        }
    }
}

fn load_config(cli: &Cli) -> anyhow::Result<PipelineConfig> {
    let mut config = match &cli.config {
        Some(path) => PipelineConfig::from_toml_file(path)
            .with_context(|| format!("reading configuration {}", path.display()))?,
        None => PipelineConfig::default(),
    };
    if let Some(dir) = &cli.data_dir {
        config.data_dir.clone_from(dir);
    }
    Ok(config)
}

fn open_source(cli: &Cli, config: &PipelineConfig) -> anyhow::Result<Box<dyn ExtractSource>> {
    match &cli.sqlite {
        Some(path) => {
            let store = SqliteStore::open(path)
                .with_context(|| format!("opening database {}", path.display()))?;
            Ok(Box::new(store))
        }
        None => Ok(Box::new(DirectorySource::from_config(config))),
    }
}

fn main() -> anyhow::Result<()> {
    // Setup logging
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let config = load_config(&cli)?;
    let start = Instant::now();

    match &cli.command {
        Command::View {
            cohort,
            page,
            page_size,
            json,
        } => {
            let pipeline = CohortPipeline::new(open_source(&cli, &config)?, cohort.definition()?)
                .with_config(config.clone());
            let mut request = cohort.request().with_page(*page);
            if let Some(size) = page_size {
                request = request.with_page_size(*size);
            }

            let response = pipeline.run(&request);
            if *json {
                let summary = serde_json::json!({
                    "page": response.page,
                    "page_size": response.page_size,
                    "total_pages": response.total_pages,
                    "total_rows": response.total_rows,
                    "distinct_patients": response.distinct_patients,
                    "messages": response.messages,
                    "error": response.error,
                });
                println!("{}", serde_json::to_string_pretty(&summary)?);
            } else {
                println!("{}", pretty_format_batches(&[response.rows.clone()])?);
                println!(
                    "Page {}/{} | {} rows | {} patients",
                    response.page, response.total_pages, response.total_rows, response.distinct_patients
                );
                for message in &response.messages {
                    warn!("{message}");
                }
            }
            if let Some(error) = response.error {
                bail!("cohort view failed: {error}");
            }
        }
        Command::Options { cohort } => {
            let pipeline = CohortPipeline::new(open_source(&cli, &config)?, cohort.definition()?)
                .with_config(config.clone());
            let options = pipeline.options()?;
            println!("{}", serde_json::to_string_pretty(&options)?);
        }
        Command::Snapshot { cohort, output } => {
            let pipeline = CohortPipeline::new(open_source(&cli, &config)?, cohort.definition()?)
                .with_config(config.clone());
            let mut diagnostics = Diagnostics::new();
            let view = pipeline.view(&cohort.request(), &mut diagnostics)?;
            write_snapshot(&view, output)
                .with_context(|| format!("writing snapshot {}", output.display()))?;
        }
        Command::Derive {
            product,
            output,
            keywords,
            format,
        } => {
            let source = open_source(&cli, &config)?;
            derive(source.as_ref(), *product, output, keywords, *format)?;
        }
        Command::Import { db, files } => {
            let store = SqliteStore::open(db)
                .with_context(|| format!("opening database {}", db.display()))?;
            for file in files {
                if !file.is_file() {
                    warn!("File {} not found, skipping", file.display());
                    continue;
                }
                let table = file
                    .file_stem()
                    .and_then(|stem| stem.to_str())
                    .with_context(|| format!("no table name in {}", file.display()))?;
                let rows = store
                    .import_csv(file, table)
                    .with_context(|| format!("importing {}", file.display()))?;
                info!("Imported {rows} rows from {} into {table}", file.display());
            }
        }
    }

    info!("Done in {:?}", start.elapsed());
    Ok(())
}

fn write_table(dir: &Path, name: &str, format: OutputFormat, batch: &RecordBatch) -> anyhow::Result<()> {
    let path = dir.join(format!("{name}.{}", format.extension()));
    write_snapshot(batch, &path).with_context(|| format!("writing {}", path.display()))
}

fn derive(
    source: &dyn ExtractSource,
    product: Product,
    output: &Path,
    keywords: &[String],
    format: OutputFormat,
) -> anyhow::Result<()> {
    use ExtractKind::{
        Admissions, DischargeNotes, EdDiagnoses, EdStays, IcdDictionary, LabItems, Labs, MedRecon,
        Prescriptions, Pyxis, RadiologyNotes, Triage,
    };

    let required: &[ExtractKind] = match product {
        Product::TopDiagnoses => &[EdDiagnoses, IcdDictionary],
        Product::LengthOfStay | Product::VisitTrend => &[EdStays],
        Product::ComplaintDiagnosis => &[Triage, EdDiagnoses, IcdDictionary],
        Product::KeywordCohort => &[EdDiagnoses, IcdDictionary, EdStays],
        Product::ModelInput => &[EdDiagnoses, IcdDictionary, EdStays, Admissions],
    };
    let optional: &[ExtractKind] = match product {
        Product::KeywordCohort => &[
            Labs,
            LabItems,
            Prescriptions,
            Pyxis,
            MedRecon,
            DischargeNotes,
            RadiologyNotes,
        ],
        Product::ModelInput => &[Labs],
        _ => &[],
    };
    let specs: Vec<ExtractSpec> = required
        .iter()
        .map(|kind| ExtractSpec::required(*kind))
        .chain(optional.iter().map(|kind| ExtractSpec::optional(*kind)))
        .collect();

    let mut diagnostics = Diagnostics::new();
    let extracts = load_extracts(source, &specs, None, &mut diagnostics)?;

    match product {
        Product::TopDiagnoses => {
            let table = top_diagnoses(
                extracts.require(EdDiagnoses)?,
                extracts.require(IcdDictionary)?,
            )?;
            write_table(output, "top_diagnoses", format, &table)?;
        }
        Product::LengthOfStay => {
            write_table(output, "los", format, &length_of_stay(extracts.require(EdStays)?)?)?;
        }
        Product::VisitTrend => {
            write_table(output, "trend", format, &visit_trend(extracts.require(EdStays)?)?)?;
        }
        Product::ComplaintDiagnosis => {
            match complaint_diagnosis(
                extracts.require(Triage)?,
                extracts.require(EdDiagnoses)?,
                extracts.require(IcdDictionary)?,
                &mut diagnostics,
            )? {
                Some(table) => write_table(output, "complaint_diag", format, &table)?,
                None => warn!("Triage has no chief complaint column, nothing written"),
            }
        }
        Product::KeywordCohort | Product::ModelInput => {
            let cohort = keyword_cohort(
                extracts.require(EdDiagnoses)?,
                extracts.require(IcdDictionary)?,
                extracts.require(EdStays)?,
                keywords,
                &mut diagnostics,
            )?;

            let labs = match extracts.get(Labs) {
                Some(labs) => {
                    let restricted = restrict_to_subjects(labs, &cohort.subjects, &mut diagnostics)?;
                    Some(match extracts.get(LabItems) {
                        Some(items) => label_lab_results(&restricted, items)?,
                        None => restricted,
                    })
                }
                None => None,
            };

            if product == Product::ModelInput {
                let table = model_input(
                    &cohort.stays,
                    extracts.require(Admissions)?,
                    &cohort.diagnoses,
                    labs.as_ref(),
                    &mut diagnostics,
                )?;
                write_table(output, "ml_input_data", format, &table)?;
            } else {
                write_cohort_tables(&extracts, &cohort, labs.as_ref(), output, format, &mut diagnostics)?;
            }
        }
    }

    for message in diagnostics.into_messages() {
        info!("note: {message}");
    }
    Ok(())
}

fn write_cohort_tables(
    extracts: &ExtractSet,
    cohort: &KeywordCohort,
    labs: Option<&RecordBatch>,
    output: &Path,
    format: OutputFormat,
    diagnostics: &mut Diagnostics,
) -> anyhow::Result<()> {
    use ExtractKind::{DischargeNotes, MedRecon, Prescriptions, Pyxis, RadiologyNotes};

    write_table(output, "cohort_diagnoses", format, &cohort.diagnoses)?;
    write_table(output, "cohort_patients", format, &cohort.stays)?;
    if let Some(labs) = labs {
        write_table(output, "cohort_labs", format, labs)?;
    }
    for (kind, name) in [
        (Prescriptions, "cohort_meds"),
        (Pyxis, "cohort_pyxis"),
        (MedRecon, "cohort_medrecon"),
    ] {
        if let Some(table) = extracts.get(kind) {
            let restricted = restrict_to_subjects(table, &cohort.subjects, diagnostics)?;
            write_table(output, name, format, &restricted)?;
        }
    }

    let mut notes = Vec::new();
    for (kind, category) in [(DischargeNotes, "Discharge"), (RadiologyNotes, "Radiology")] {
        if let Some(table) = extracts.get(kind) {
            notes.push((category, restrict_to_subjects(table, &cohort.subjects, diagnostics)?));
        }
    }
    if !notes.is_empty() {
        let tables: Vec<(&str, &RecordBatch)> =
            notes.iter().map(|(category, table)| (*category, table)).collect();
        write_table(output, "cohort_notes", format, &combine_notes(&tables)?)?;
    }
    Ok(())
}
