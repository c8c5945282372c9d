// Entry point and high-level CLI flow.
//
// - `report` loads an inspection export, narrows it, writes every indicator
//   table as CSV plus a JSON summary and prints markdown previews.
// - `inspector` lists inspectors or breaks down the work of one of them.
// - `facilities` maintains the reference store of housing units.
mod args;
mod facilities;
mod filter;
mod indicators;
mod inspectors;
mod loader;
mod networks;
mod output;
mod types;
mod util;

use args::{Args, Command, FacilityAction, FilterArgs, InspectorArgs, ReportArgs};
use chrono::NaiveDate;
use clap::Parser;
use facilities::{missing_facilities, FacilityLookup, FacilityStore};
use filter::FilterSpec;
use indicators::{with_total, IndicatorEngine};
use log::{info, warn};
use output::{preview_table_rows, ReportWriter};
use serde::Serialize;
use std::error::Error;
use std::fs::File;
use std::path::Path;
use types::{columns, GeneralMetrics, HouseStatus, InspectionRecord, NetworkReport, ReportSummary};

fn init_logging(verbose: bool) {
    let level = if verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();
}

fn filter_spec(args: &FilterArgs) -> FilterSpec {
    let mut spec = FilterSpec::new();
    if let Some(activity) = args.activity {
        spec = spec.activity(activity);
    }
    if let Some(year) = args.year {
        spec = spec.with(columns::YEAR, year.to_string());
    }
    if !args.facility_codes.is_empty() {
        spec = spec.any_of(columns::FACILITY_CODE, args.facility_codes.iter().cloned());
    }
    for (column, value) in &args.filters {
        spec = spec.with(column, value.clone());
    }
    if args.from.is_some() || args.to.is_some() {
        spec = spec.between(
            args.from.unwrap_or(NaiveDate::MIN),
            args.to.unwrap_or(NaiveDate::MAX),
        );
    }
    spec
}

/// Advisory only: unknown facilities still get computed, with zero capacity.
fn warn_missing(store: &dyn FacilityLookup, records: &[&InspectionRecord]) -> Vec<i64> {
    let missing = missing_facilities(store, records);
    for code in &missing {
        let network = networks::network_of(*code).map_or("no network", |n| n.name);
        warn!(
            "Facility {} ({}) has no registered housing total; its coverage is reported as 0",
            code, network
        );
    }
    missing
}

#[derive(Serialize)]
struct NetworkSummary<'a> {
    general: GeneralMetrics,
    networks: &'a [NetworkReport],
}

fn handle_report(args: &ReportArgs, store_path: Option<&Path>) -> Result<(), Box<dyn Error>> {
    let (dataset, load_report) = loader::load_dataset(&args.input)?;
    if dataset.is_empty() {
        warn!("{} has no data rows", args.input.display());
    }
    let store = FacilityStore::open(store_path)?;
    println!(
        "Processing dataset... ({} rows loaded, {} without inspection date)",
        util::format_int(load_report.total_rows),
        util::format_int(load_report.missing_dates)
    );
    if load_report.coerced_cells > 0 {
        println!(
            "Note: {} cells could not be parsed and were set to defaults.",
            util::format_int(load_report.coerced_cells)
        );
    }
    if let Some((first, last)) = dataset.date_range() {
        println!("Period in file: {} to {}", first, last);
    }

    let subset = filter::filter(&dataset, &filter_spec(&args.filter));
    info!("{} of {} rows selected", subset.len(), dataset.len());
    println!("");
    let missing = warn_missing(&store, &subset);

    let engine = IndicatorEngine::new(&store);
    let mut writer = ReportWriter::new(&args.out_dir, args.preview_rows)?;

    let aedic = engine.aedic_index(&subset);
    writer.table("indice_aedico.csv", "Índice Aédico por establecimiento", &with_total(&aedic));
    let container = engine.container_index(&subset);
    writer.table("indice_recipiente.csv", "Índice de Recipiente", &with_total(&container));
    let breteau = engine.breteau_index(&subset);
    writer.table("indice_breteau.csv", "Índice de Breteau", &with_total(&breteau));
    let coverage = engine.coverage_percentages(&subset);
    writer.table("cobertura.csv", "Cobertura de viviendas", &with_total(&coverage));
    let (larvicide, total_larvicide) = engine.larvicide_consumption(&subset);
    writer.table("consumo_larvicida.csv", "Consumo de larvicida (g)", &with_total(&larvicide));
    let (febrile, total_febrile) = engine.febrile_cases(&subset);
    writer.table("febriles.csv", "Casos febriles", &with_total(&febrile));
    let stats = engine.container_statistics(&subset);
    writer.table("recipientes.csv", "Recipientes por tipo", &with_total(&stats));
    writer.table(
        "tratamiento_por_tipo.csv",
        "Tratamiento por tipo de recipiente",
        &engine.container_treatment_by_type(&subset),
    );
    writer.table(
        "frecuencia_recipientes.csv",
        "Frecuencia de recipientes",
        &engine.container_frequency(&subset),
    );
    writer.table("tendencia_mensual.csv", "Tendencia mensual", &engine.monthly_trends(&subset));
    writer.table(
        "vigilancia_semanal.csv",
        "Días de vigilancia por semana",
        &engine.weekly_surveillance_days(&subset),
    );
    writer.table(
        "indice_aedico_mensual.csv",
        "Índice Aédico mensual por establecimiento",
        &engine.monthly_aedic_by_facility(&subset),
    );
    writer.table(
        "rendimiento_establecimientos.csv",
        "Rendimiento por establecimiento",
        &engine.facility_performance(&subset),
    );
    writer.table(
        "efectividad_cerco.csv",
        "Efectividad del cerco",
        &engine.cerco_effectiveness(&subset),
    );
    writer.table(
        "cerco_mensual.csv",
        "Tendencia mensual del cerco",
        &engine.cerco_monthly_trends(&subset),
    );
    writer.table(
        "cobertura_geografica.csv",
        "Cobertura geográfica por departamento",
        &engine.geographic_coverage(&subset),
    );
    writer.table(
        "densidad_intervencion.csv",
        "Densidad de intervención por manzana",
        &engine.intervention_density(&subset),
    );
    let recovery = engine.recovery_metrics(&subset);
    if let Some(recovery) = &recovery {
        writer.table("viviendas_recuperadas.csv", "Viviendas recuperadas", &recovery.details);
    }

    let network_reports = networks::network_report(&subset, &store);
    let network_lines: Vec<_> = network_reports.iter().flat_map(|n| n.facilities.clone()).collect();
    writer.table("redes_establecimientos.csv", "Detalle por red de salud", &network_lines);
    let general = networks::general_metrics(&subset, &store);

    let inspection = engine.inspection_summary(&subset);
    for (status, count) in [
        (HouseStatus::Inspected, inspection.inspected),
        (HouseStatus::Closed, inspection.closed),
        (HouseStatus::Reluctant, inspection.reluctant),
        (HouseStatus::Uninhabited, inspection.uninhabited),
    ] {
        println!("{} ({}): {}", status.label(), status.code(), util::format_int(count));
    }

    let summary = ReportSummary {
        activity_type: args.filter.activity.map(|a| a.to_string()),
        total_records: subset.len(),
        facilities: aedic.len(),
        active_inspectors: general.active_inspectors,
        total_larvicide,
        total_febrile_cases: total_febrile,
        treated_containers: engine.treated_containers(&subset),
        containers: engine.container_totals(&subset),
        treatment: engine.treatment_statistics(&subset),
        inspection,
        entomological: engine.entomological_summary(&subset),
        cerco: engine.cerco_indicators(&subset),
        recovery,
        missing_facilities: missing,
    };
    println!("\nSummary Stats (summary.json):");
    println!(
        "{{\"total_larvicide\": {}, \"total_febrile_cases\": {}, \"treated_containers\": {}}}\n",
        util::format_number(summary.total_larvicide, 2),
        util::format_int(summary.total_febrile_cases),
        util::format_int(summary.treated_containers)
    );
    writer.json("summary.json", &summary);
    writer.json(
        "redes.json",
        &NetworkSummary {
            general,
            networks: &network_reports,
        },
    );
    writer.finish();
    Ok(())
}

fn handle_inspector(args: &InspectorArgs, store_path: Option<&Path>) -> Result<(), Box<dyn Error>> {
    let (dataset, _) = loader::load_dataset(&args.input)?;
    let mut writer = ReportWriter::new(&args.out_dir, args.preview_rows)?;

    let Some(id) = args.id.as_deref() else {
        let directory = inspectors::inspector_directory(&dataset);
        if directory.is_empty() {
            warn!("No inspectors found in {}", args.input.display());
        }
        writer.table("inspectores.csv", "Inspectores", &directory);
        writer.finish();
        return Ok(());
    };

    let everyone = dataset.all();
    let subset = filter::filter(&dataset, &filter_spec(&args.filter));
    let mine = inspectors::records_for(&subset, id);
    if mine.is_empty() {
        warn!("Inspector {} has no records in the selected view", id);
    }

    let summary = inspectors::inspector_summary(id, &mine);
    println!("Inspector: {} (DNI: {})", summary.name, summary.id);
    println!(
        "Records: {}  Inspected: {}  Positive: {}  Aedic index: {}%  Larvicide: {} g",
        util::format_int(summary.total_records),
        util::format_int(summary.inspected_houses),
        util::format_int(summary.positive_houses),
        util::format_number(summary.aedic_index, 2),
        util::format_number(summary.total_larvicide, 2)
    );
    if let (Some(first), Some(last)) = (summary.first_date, summary.last_date) {
        println!("Period: {} to {}\n", first, last);
    }

    let store = FacilityStore::open(store_path)?;
    let engine = IndicatorEngine::new(&store);
    writer.table(
        &format!("inspector_{}_diario.csv", id),
        "Detalle por día",
        &inspectors::daily_inspections(&mine),
    );
    writer.table(
        &format!("inspector_{}_recipientes.csv", id),
        "Recipientes",
        &with_total(&engine.container_statistics(&mine)),
    );

    let productivity = inspectors::productivity(&mine, &everyone);
    println!(
        "Working days: {}  Daily average: {}  Efficiency: {}%",
        productivity.working_days,
        util::format_number(productivity.average_per_day, 1),
        util::format_number(productivity.efficiency_pct, 1)
    );
    println!(
        "Performance: {} ({}x the mean inspector)\n",
        productivity.band,
        util::format_number(productivity.performance_ratio, 1)
    );
    writer.table(
        &format!("inspector_{}_mensual.csv", id),
        "Productividad mensual",
        &productivity.monthly,
    );
    writer.json(&format!("inspector_{}.json", id), &(summary, productivity));
    writer.finish();
    Ok(())
}

fn handle_facilities(
    action: &FacilityAction,
    store_path: Option<&Path>,
) -> Result<(), Box<dyn Error>> {
    let mut store = FacilityStore::open(store_path)?;
    let require_path = || store_path.ok_or("--facility-store is required to save changes");

    match action {
        FacilityAction::List => {
            let all = store.all();
            println!("{} facilities\n", util::format_int(all.len()));
            preview_table_rows(&all, all.len());
        }
        FacilityAction::Missing { input } => {
            let (dataset, _) = loader::load_dataset(input)?;
            let missing = warn_missing(&store, &dataset.all());
            if missing.is_empty() {
                println!("Every facility in {} is registered.", input.display());
            } else {
                println!("{} facilities without housing data:", missing.len());
                for code in missing {
                    println!("  {}", code);
                }
            }
        }
        FacilityAction::Import { file, user } => {
            let path = require_path()?;
            let extension = file
                .extension()
                .and_then(|e| e.to_str())
                .map(str::to_lowercase)
                .unwrap_or_default();
            let n = match extension.as_str() {
                "xlsx" => store.import_xlsx(file, user)?,
                "txt" => store.import_housing_text(File::open(file)?, user)?,
                _ => store.import_csv(File::open(file)?, user)?,
            };
            store.save_json(path)?;
            info!("Imported {} facilities from {}", n, file.display());
        }
        FacilityAction::Export { file } => {
            store.export_csv(file)?;
            info!("Exported {} facilities to {}", store.len(), file.display());
        }
        FacilityAction::Set {
            code,
            total_houses,
            name,
            user,
        } => {
            let path = require_path()?;
            match name {
                Some(name) => store.upsert(*code, name, *total_houses, user),
                None => store.update_total_houses(*code, *total_houses, user)?,
            }
            store.save_json(path)?;
            if let Some(f) = store.get(*code) {
                info!(
                    "Facility {} ({}) now has {} houses",
                    code, f.nombre_establecimiento, f.total_viviendas
                );
            }
        }
    }
    Ok(())
}

fn main() -> Result<(), Box<dyn Error>> {
    let args = Args::parse();
    init_logging(args.verbose);
    let store_path = args.facility_store.as_deref();
    match &args.command {
        Command::Report(report) => handle_report(report, store_path),
        Command::Inspector(inspector) => handle_inspector(inspector, store_path),
        Command::Facilities { action } => handle_facilities(action, store_path),
    }
}
