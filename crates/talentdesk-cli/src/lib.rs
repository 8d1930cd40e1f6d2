#![allow(clippy::missing_errors_doc)]
#![allow(clippy::uninlined_format_args)]

use std::collections::BTreeMap;
use std::path::PathBuf;

use anyhow::{anyhow, Context, Result};
use clap::{Args, Parser, Subcommand};
use serde_json::{Map, Value};
use talentdesk_core::{
    apply_criteria, compute_metrics, default_metrics, group_by, parse_date_value, sort_records,
    value_text, Criteria, DomainSchema, MetricValue, MutationGateway, PageSpec, RangeCriterion,
    Record, RecordId, RecordStore, SortDirection, ViewSpec,
};
use talentdesk_store_sqlite::{SeedReport, SqliteRecordStore};
use ulid::Ulid;

#[derive(Debug, Parser)]
#[command(name = "td")]
#[command(about = "Talentdesk admin record pipeline")]
pub struct Cli {
    #[arg(long, default_value = "./talentdesk.sqlite3")]
    pub db: PathBuf,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// List registered resources with record counts.
    Resources(ResourcesArgs),
    /// Inspect or register domain schemas.
    Schema {
        #[command(subcommand)]
        command: SchemaCommand,
    },
    /// Load built-in sample data into empty resources.
    Seed(SeedArgs),
    /// List records with filter, search, sort, pagination, and grouping.
    List(ListArgs),
    /// Summary metrics for a resource, optionally over a filtered subset.
    Stats(StatsArgs),
    /// Print one record as JSON.
    Show(ShowArgs),
    /// Create a record through the validating gateway.
    Create(CreateArgs),
    /// Merge field changes into a record through the validating gateway.
    Update(UpdateArgs),
    /// Delete a record. Deleting the same id twice fails.
    Delete(DeleteArgs),
}

#[derive(Debug, Args)]
pub struct ResourcesArgs {
    #[arg(long)]
    json: bool,
}

#[derive(Debug, Subcommand)]
pub enum SchemaCommand {
    Show(SchemaShowArgs),
    Put(SchemaPutArgs),
}

#[derive(Debug, Args)]
pub struct SchemaShowArgs {
    #[arg(long)]
    resource: String,
    #[arg(long)]
    json: bool,
}

#[derive(Debug, Args)]
pub struct SchemaPutArgs {
    #[arg(long)]
    file: Option<PathBuf>,
    #[arg(long)]
    schema_json: Option<String>,
}

#[derive(Debug, Args)]
pub struct SeedArgs {
    #[arg(long)]
    json: bool,
}

#[derive(Debug, Args)]
pub struct FilterArgs {
    #[arg(long = "equal", value_name = "FIELD=VALUE")]
    equal: Vec<String>,
    #[arg(long)]
    search: Option<String>,
    #[arg(long = "range", value_name = "FIELD=MIN..MAX")]
    range: Vec<String>,
    #[arg(long = "date-range", value_name = "FIELD=AFTER..BEFORE")]
    date_range: Vec<String>,
}

#[derive(Debug, Args)]
pub struct ListArgs {
    #[arg(long)]
    resource: String,
    #[command(flatten)]
    filter: FilterArgs,
    #[arg(long)]
    sort_by: Option<String>,
    #[arg(long, default_value = "asc")]
    direction: String,
    #[arg(long, default_value_t = 0)]
    page: usize,
    #[arg(long, default_value_t = 25)]
    page_size: usize,
    #[arg(long)]
    group_by: Option<String>,
    #[arg(long)]
    json: bool,
}

#[derive(Debug, Args)]
pub struct StatsArgs {
    #[arg(long)]
    resource: String,
    #[command(flatten)]
    filter: FilterArgs,
    #[arg(long)]
    json: bool,
}

#[derive(Debug, Args)]
pub struct ShowArgs {
    #[arg(long)]
    resource: String,
    #[arg(long)]
    id: String,
}

#[derive(Debug, Args)]
pub struct CreateArgs {
    #[arg(long)]
    resource: String,
    #[arg(long = "set", value_name = "FIELD=VALUE")]
    set: Vec<String>,
    #[arg(long, default_value = "{}")]
    fields_json: String,
}

#[derive(Debug, Args)]
pub struct UpdateArgs {
    #[arg(long)]
    resource: String,
    #[arg(long)]
    id: String,
    #[arg(long = "set", value_name = "FIELD=VALUE")]
    set: Vec<String>,
    #[arg(long, default_value = "{}")]
    fields_json: String,
}

#[derive(Debug, Args)]
pub struct DeleteArgs {
    #[arg(long)]
    resource: String,
    #[arg(long)]
    id: String,
}

/// Executes the parsed top-level CLI command graph.
///
/// # Errors
/// Returns an error when the database cannot be opened or migrated, or when
/// the requested command fails.
pub fn run_cli(cli: Cli) -> Result<()> {
    let store = SqliteRecordStore::open(&cli.db)?;
    store.migrate()?;
    run_command(cli.command, &store)
}

/// Executes a parsed command against an existing store handle.
///
/// # Errors
/// Returns an error when validation, persistence, or output encoding fails.
pub fn run_command(command: Command, store: &SqliteRecordStore) -> Result<()> {
    match command {
        Command::Resources(args) => {
            let schemas = store.get_schemas()?;
            let mut rows = Vec::new();
            for resource in schemas.keys() {
                rows.push((resource.clone(), store.count_records(resource)?));
            }
            if args.json {
                let payload = build_resource_list_json_payload(&rows);
                println!("{}", serde_json::to_string_pretty(&payload)?);
            } else {
                print_resource_table(&rows);
            }
            Ok(())
        }
        Command::Schema { command } => run_schema(command, store),
        Command::Seed(args) => {
            let report = store.seed_fixtures()?;
            if args.json {
                let payload = build_seed_report_json_payload(&report);
                println!("{}", serde_json::to_string_pretty(&payload)?);
            } else {
                print_seed_report(&report);
            }
            Ok(())
        }
        Command::List(args) => run_list(&args, store),
        Command::Stats(args) => {
            let schema = require_schema(store, &args.resource)?;
            let records = store.scoped(&args.resource).list()?;
            let criteria = build_criteria(&args.filter)?;
            let considered = apply_criteria(&records, &criteria, &schema);
            let metrics = compute_metrics(&considered, &default_metrics(&schema));

            if args.json {
                let payload = build_record_stats_json_payload(
                    &args.resource,
                    records.len(),
                    considered.len(),
                    &metrics,
                );
                println!("{}", serde_json::to_string_pretty(&payload)?);
            } else {
                print_stats_table(&metrics);
            }
            Ok(())
        }
        Command::Show(args) => {
            require_schema(store, &args.resource)?;
            let id = parse_record_id(&args.id)?;
            let record = store.scoped(&args.resource).get(id)?;
            println!("{}", serde_json::to_string_pretty(&record)?);
            Ok(())
        }
        Command::Create(args) => {
            let schema = require_schema(store, &args.resource)?;
            let fields = collect_fields(&args.fields_json, &args.set)?;
            let mut scoped = store.scoped(&args.resource);
            let mut gateway = MutationGateway::new(&schema, &mut scoped)?;
            let record = gateway.create(fields)?;
            println!("{}", serde_json::to_string_pretty(&record)?);
            Ok(())
        }
        Command::Update(args) => {
            let schema = require_schema(store, &args.resource)?;
            let id = parse_record_id(&args.id)?;
            let partial = collect_fields(&args.fields_json, &args.set)?;
            let mut scoped = store.scoped(&args.resource);
            let mut gateway = MutationGateway::new(&schema, &mut scoped)?;
            let record = gateway.update(id, &partial)?;
            println!("{}", serde_json::to_string_pretty(&record)?);
            Ok(())
        }
        Command::Delete(args) => {
            let schema = require_schema(store, &args.resource)?;
            let id = parse_record_id(&args.id)?;
            let mut scoped = store.scoped(&args.resource);
            let mut gateway = MutationGateway::new(&schema, &mut scoped)?;
            gateway.delete(id)?;
            println!("deleted {id}");
            Ok(())
        }
    }
}

fn run_schema(command: SchemaCommand, store: &SqliteRecordStore) -> Result<()> {
    match command {
        SchemaCommand::Show(args) => {
            let schema = require_schema(store, &args.resource)?;
            if args.json {
                println!("{}", serde_json::to_string_pretty(&schema)?);
            } else {
                print_schema_table(&schema);
            }
            Ok(())
        }
        SchemaCommand::Put(args) => {
            let raw = match (&args.file, &args.schema_json) {
                (Some(path), None) => std::fs::read_to_string(path)
                    .with_context(|| format!("failed to read {}", path.display()))?,
                (None, Some(inline)) => inline.clone(),
                _ => return Err(anyhow!("provide exactly one of --file or --schema-json")),
            };
            let value: Value =
                serde_json::from_str(&raw).context("schema document must be valid JSON")?;
            let schema = DomainSchema::from_json(&value)?;
            store.upsert_schema(&schema)?;
            println!("registered schema for '{}'", schema.resource);
            Ok(())
        }
    }
}

fn run_list(args: &ListArgs, store: &SqliteRecordStore) -> Result<()> {
    let schema = require_schema(store, &args.resource)?;
    let records = store.scoped(&args.resource).list()?;
    let criteria = build_criteria(&args.filter)?;
    let direction = parse_direction(&args.direction)?;
    let matched = apply_criteria(&records, &criteria, &schema);

    if let Some(key) = &args.group_by {
        let sorted = match &args.sort_by {
            Some(sort_key) => sort_records(&matched, sort_key, direction),
            None => matched,
        };
        let groups = group_by(&sorted, key);
        if args.json {
            let payload =
                build_record_groups_json_payload(&args.resource, records.len(), key, &groups);
            println!("{}", serde_json::to_string_pretty(&payload)?);
        } else {
            print_group_tables(&schema, &groups);
        }
        return Ok(());
    }

    let view = ViewSpec {
        sort_by: args.sort_by.clone(),
        direction,
        page: Some(PageSpec {
            size: args.page_size,
            index: args.page,
        }),
    };
    let page = talentdesk_core::project(&matched, &view);

    if args.json {
        let payload = build_record_list_json_payload(
            &args.resource,
            records.len(),
            matched.len(),
            args.page,
            args.page_size,
            &page,
        );
        println!("{}", serde_json::to_string_pretty(&payload)?);
    } else {
        print_record_table(&schema, &page);
        println!(
            "page {} of {} matching records ({} total)",
            args.page,
            matched.len(),
            records.len()
        );
    }
    Ok(())
}

fn require_schema(store: &SqliteRecordStore, resource: &str) -> Result<DomainSchema> {
    store.get_schema(resource)?.ok_or_else(|| {
        anyhow!("unknown resource '{resource}'; run `td resources` to list registered resources")
    })
}

fn parse_direction(raw: &str) -> Result<SortDirection> {
    SortDirection::parse(raw)
        .ok_or_else(|| anyhow!("invalid --direction '{raw}': expected asc or desc"))
}

fn parse_record_id(raw: &str) -> Result<RecordId> {
    let parsed = Ulid::from_string(raw).with_context(|| format!("invalid record id: {raw}"))?;
    Ok(RecordId(parsed))
}

fn split_pair(raw: &str) -> Result<(&str, &str)> {
    raw.split_once('=')
        .ok_or_else(|| anyhow!("expected FIELD=VALUE, got '{raw}'"))
}

/// Values typed as JSON when they parse as JSON, plain strings otherwise:
/// `days=4` becomes a number, `employee=John Doe` a string.
fn parse_field_value(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

fn collect_fields(fields_json: &str, assignments: &[String]) -> Result<Map<String, Value>> {
    let base: Value = serde_json::from_str(fields_json)
        .with_context(|| format!("--fields-json must be valid JSON: {fields_json}"))?;
    let Value::Object(mut fields) = base else {
        return Err(anyhow!("--fields-json must be a JSON object"));
    };
    for assignment in assignments {
        let (field, raw) = split_pair(assignment)?;
        let _ = fields.insert(field.to_string(), parse_field_value(raw));
    }
    Ok(fields)
}

fn build_criteria(filter: &FilterArgs) -> Result<Criteria> {
    let mut equals = BTreeMap::new();
    for pair in &filter.equal {
        let (field, value) = split_pair(pair)?;
        let _ = equals.insert(field.to_string(), value.to_string());
    }

    let mut ranges = Vec::new();
    for raw in &filter.range {
        ranges.push(parse_number_range(raw)?);
    }
    for raw in &filter.date_range {
        ranges.push(parse_date_range(raw)?);
    }

    Ok(Criteria {
        equals,
        search: filter.search.clone().unwrap_or_default(),
        ranges,
    })
}

fn split_bounds(raw: &str) -> Result<(String, &str, &str)> {
    let (field, bounds) = raw
        .split_once('=')
        .ok_or_else(|| anyhow!("expected FIELD=MIN..MAX, got '{raw}'"))?;
    let (low, high) = bounds
        .split_once("..")
        .ok_or_else(|| anyhow!("expected FIELD=MIN..MAX, got '{raw}'"))?;
    Ok((field.to_string(), low, high))
}

fn parse_number_range(raw: &str) -> Result<RangeCriterion> {
    let (field, low, high) = split_bounds(raw)?;
    let parse_bound = |bound: &str| -> Result<Option<f64>> {
        if bound.is_empty() {
            return Ok(None);
        }
        let value = bound
            .parse::<f64>()
            .with_context(|| format!("invalid number '{bound}' in --range"))?;
        Ok(Some(value))
    };
    Ok(RangeCriterion::Number {
        field,
        min: parse_bound(low)?,
        max: parse_bound(high)?,
    })
}

fn parse_date_range(raw: &str) -> Result<RangeCriterion> {
    let (field, low, high) = split_bounds(raw)?;
    let parse_bound = |bound: &str| -> Result<Option<time::OffsetDateTime>> {
        if bound.is_empty() {
            return Ok(None);
        }
        parse_date_value(bound)
            .map(Some)
            .ok_or_else(|| anyhow!("invalid date '{bound}' in --date-range (RFC3339 or YYYY-MM-DD)"))
    };
    Ok(RangeCriterion::Date {
        field,
        after: parse_bound(low)?,
        before: parse_bound(high)?,
    })
}

fn yes_no(flag: bool) -> &'static str {
    if flag {
        "yes"
    } else {
        "no"
    }
}

fn print_resource_table(rows: &[(String, usize)]) {
    println!("{:<24} records", "resource");
    println!("{}", "-".repeat(34));
    for (resource, count) in rows {
        println!("{resource:<24} {count}");
    }
}

fn print_schema_table(schema: &DomainSchema) {
    println!("resource: {}", schema.resource);
    println!(
        "{:<18} {:<8} {:<9} {:<11} {:<11} {:<10} values",
        "field", "kind", "required", "filterable", "searchable", "aggregate"
    );
    println!("{}", "-".repeat(92));
    for spec in &schema.fields {
        println!(
            "{:<18} {:<8} {:<9} {:<11} {:<11} {:<10} {}",
            spec.name,
            spec.kind.as_str(),
            yes_no(spec.required),
            yes_no(spec.filterable),
            yes_no(spec.searchable),
            yes_no(spec.aggregate),
            spec.allowed_values.join(",")
        );
    }
    for derived in &schema.derived {
        match &derived.rule {
            talentdesk_core::DerivedRule::Difference {
                minuend,
                subtrahend,
            } => println!("derived: {} = {minuend} - {subtrahend}", derived.name),
            talentdesk_core::DerivedRule::RatioPercent {
                numerator,
                denominator,
            } => println!(
                "derived: {} = {numerator} / {denominator} * 100",
                derived.name
            ),
        }
    }
    if let Some(flow) = &schema.status_flow {
        println!("status field: {} (initial '{}')", flow.field, flow.initial);
        for (from, targets) in &flow.transitions {
            println!("  {from} -> {}", targets.join(", "));
        }
        if !flow.reason_required.is_empty() {
            println!(
                "  '{}' required when entering: {}",
                flow.reason_field,
                flow.reason_required.join(", ")
            );
        }
    }
}

fn print_seed_report(report: &SeedReport) {
    for (resource, count) in &report.seeded {
        println!("seeded {resource}: {count} records");
    }
    for resource in &report.skipped {
        println!("skipped {resource}: already has records");
    }
    if report.seeded.is_empty() && report.skipped.is_empty() {
        println!("no resources registered");
    }
}

fn print_record_table(schema: &DomainSchema, records: &[Record]) {
    let mut columns: Vec<&str> = schema
        .fields
        .iter()
        .map(|spec| spec.name.as_str())
        .collect();
    columns.extend(schema.derived.iter().map(|spec| spec.name.as_str()));

    let header: String = columns.iter().map(|name| format!("{name:<16} ")).collect();
    println!("{:<27}{header}", "record_id");
    println!("{}", "-".repeat(27 + 17 * columns.len()));

    for record in records {
        let row: String = columns
            .iter()
            .map(|name| {
                let text = record
                    .fields
                    .get(*name)
                    .and_then(value_text)
                    .unwrap_or_default();
                format!("{text:<16} ")
            })
            .collect();
        let id = record.id.to_string();
        println!("{id:<27}{row}");
    }
}

fn print_group_tables(schema: &DomainSchema, groups: &[(String, Vec<Record>)]) {
    for (key, members) in groups {
        let label = if key.is_empty() { "(none)" } else { key.as_str() };
        println!("{label} ({} records)", members.len());
        print_record_table(schema, members);
        println!();
    }
}

fn print_stats_table(metrics: &[MetricValue]) {
    println!("{:<28} value", "metric");
    println!("{}", "-".repeat(40));
    for metric in metrics {
        println!("{:<28} {}", metric.name, metric.value);
    }
}

#[derive(Debug, serde::Serialize, serde::Deserialize, PartialEq)]
pub struct RecordListJsonPayload {
    contract_version: String,
    resource: String,
    total: usize,
    matched: usize,
    page: usize,
    page_size: usize,
    records: Vec<Record>,
}

fn build_record_list_json_payload(
    resource: &str,
    total: usize,
    matched: usize,
    page: usize,
    page_size: usize,
    records: &[Record],
) -> RecordListJsonPayload {
    RecordListJsonPayload {
        contract_version: "record_list.v1".to_string(),
        resource: resource.to_string(),
        total,
        matched,
        page,
        page_size,
        records: records.to_vec(),
    }
}

#[derive(Debug, serde::Serialize, serde::Deserialize, PartialEq)]
pub struct RecordGroupJson {
    key: String,
    count: usize,
    records: Vec<Record>,
}

#[derive(Debug, serde::Serialize, serde::Deserialize, PartialEq)]
pub struct RecordGroupsJsonPayload {
    contract_version: String,
    resource: String,
    total: usize,
    group_field: String,
    groups: Vec<RecordGroupJson>,
}

fn build_record_groups_json_payload(
    resource: &str,
    total: usize,
    group_field: &str,
    groups: &[(String, Vec<Record>)],
) -> RecordGroupsJsonPayload {
    RecordGroupsJsonPayload {
        contract_version: "record_groups.v1".to_string(),
        resource: resource.to_string(),
        total,
        group_field: group_field.to_string(),
        groups: groups
            .iter()
            .map(|(key, members)| RecordGroupJson {
                key: key.clone(),
                count: members.len(),
                records: members.clone(),
            })
            .collect(),
    }
}

#[derive(Debug, serde::Serialize, serde::Deserialize, PartialEq)]
pub struct RecordStatsJsonPayload {
    contract_version: String,
    resource: String,
    total: usize,
    considered: usize,
    metrics: Vec<MetricValue>,
}

fn build_record_stats_json_payload(
    resource: &str,
    total: usize,
    considered: usize,
    metrics: &[MetricValue],
) -> RecordStatsJsonPayload {
    RecordStatsJsonPayload {
        contract_version: "record_stats.v1".to_string(),
        resource: resource.to_string(),
        total,
        considered,
        metrics: metrics.to_vec(),
    }
}

#[derive(Debug, serde::Serialize, serde::Deserialize, PartialEq)]
pub struct SeedReportJsonPayload {
    contract_version: String,
    seeded: BTreeMap<String, usize>,
    skipped: Vec<String>,
}

fn build_seed_report_json_payload(report: &SeedReport) -> SeedReportJsonPayload {
    SeedReportJsonPayload {
        contract_version: "seed_report.v1".to_string(),
        seeded: report.seeded.clone(),
        skipped: report.skipped.clone(),
    }
}

#[derive(Debug, serde::Serialize, serde::Deserialize, PartialEq)]
pub struct ResourceCountJson {
    resource: String,
    records: usize,
}

#[derive(Debug, serde::Serialize, serde::Deserialize, PartialEq)]
pub struct ResourceListJsonPayload {
    contract_version: String,
    resources: Vec<ResourceCountJson>,
}

fn build_resource_list_json_payload(rows: &[(String, usize)]) -> ResourceListJsonPayload {
    ResourceListJsonPayload {
        contract_version: "resource_list.v1".to_string(),
        resources: rows
            .iter()
            .map(|(resource, records)| ResourceCountJson {
                resource: resource.clone(),
                records: *records,
            })
            .collect(),
    }
}
