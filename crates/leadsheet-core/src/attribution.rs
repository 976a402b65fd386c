//! Sales-to-lead attribution and the per-source report
//!
//! Leads are cleaned first: the assigned agent is trimmed and lowercased and
//! repeated (phone, assigned, source) leads are dropped. Each sale is credited to the lead source whose lead row shares its order
//! number and agent. When the customer name and agent point at a different
//! lead source, the name match wins. Sales without an order id fall back
//! to the name match alone.

use crate::cleaner::{dedupe, DedupeOptions};
use crate::error::{Error, Result};
use crate::summarizer::{summarize, Summary, SummaryRequest};
use crate::table::{CellValue, Table};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use tracing::{debug, info, warn};

/// Substrings used to recognise columns in each sheet (case-insensitive)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ColumnHints {
    pub sales_agent: Vec<String>,
    pub sales_name: Vec<String>,
    pub sales_deposit: Vec<String>,
    pub sales_order_id: Vec<String>,
    pub leads_assigned: Vec<String>,
    pub leads_name: Vec<String>,
    pub leads_source: Vec<String>,
    pub leads_order_number: Vec<String>,
    pub leads_phone: Vec<String>,
}

fn hints(words: &[&str]) -> Vec<String> {
    words.iter().map(|w| w.to_string()).collect()
}

impl Default for ColumnHints {
    fn default() -> Self {
        Self {
            sales_agent: hints(&["agent", "agents", "agent name"]),
            sales_name: hints(&["name", "customer name"]),
            sales_deposit: hints(&["deposit"]),
            sales_order_id: hints(&["order id"]),
            leads_assigned: hints(&["assigned"]),
            leads_name: hints(&["customer name"]),
            leads_source: hints(&["source"]),
            leads_order_number: hints(&["number"]),
            leads_phone: hints(&["phone"]),
        }
    }
}

/// Attribution settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AttributionConfig {
    pub hints: ColumnHints,
    /// Cost per lead, by source name
    pub lead_costs: BTreeMap<String, f64>,
    /// Cost for sources without an entry in `lead_costs`
    pub default_lead_cost: f64,
}

impl Default for AttributionConfig {
    fn default() -> Self {
        Self {
            hints: ColumnHints::default(),
            lead_costs: BTreeMap::new(),
            default_lead_cost: 1.0,
        }
    }
}

impl AttributionConfig {
    /// Cost of a single lead from `source`
    pub fn lead_cost(&self, source: &str) -> f64 {
        self.lead_costs
            .get(source)
            .copied()
            .unwrap_or(self.default_lead_cost)
    }
}

/// Output of [`attribute_sales`]
#[derive(Debug, Clone)]
pub struct Attribution {
    /// `Source, Name, Agent, Deposit, Order ID`, one row per unique sale
    pub matched: Table,
    /// `Source, Total Leads, Deposits, Total Unique Sales, Lead Cost, Total Leads Cost`
    pub report: Table,
    /// Sales with a positive deposit, after merging by order
    pub sales_considered: usize,
    /// Of those, sales no lead could be found for
    pub unmatched: usize,
    /// Duplicate leads dropped before matching
    pub leads_removed: usize,
}

/// Output of [`clean_leads`]
#[derive(Debug, Clone)]
pub struct CleanedLeads {
    /// Leads with the assigned agent normalized and duplicates dropped
    pub table: Table,
    /// Number of duplicate leads dropped
    pub removed: usize,
    /// Lead count per source, sorted by source
    pub leads_per_source: Summary,
}

pub const MATCHED_COLUMNS: [&str; 5] = ["Source", "Name", "Agent", "Deposit", "Order ID"];
pub const REPORT_COLUMNS: [&str; 6] = [
    "Source",
    "Total Leads",
    "Deposits",
    "Total Unique Sales",
    "Lead Cost",
    "Total Leads Cost",
];

/// Find a column by hint: exact name first, then substring, skipping `taken`
fn resolve(table: &Table, hints: &[String], taken: &[usize]) -> Option<usize> {
    let names: Vec<(usize, String)> = table
        .columns
        .iter()
        .filter(|c| !taken.contains(&c.index))
        .map(|c| (c.index, c.name.trim().to_lowercase()))
        .collect();
    let hints: Vec<String> = hints.iter().map(|h| h.trim().to_lowercase()).collect();

    names
        .iter()
        .find(|(_, n)| hints.iter().any(|h| n == h))
        .or_else(|| {
            names
                .iter()
                .find(|(_, n)| hints.iter().any(|h| n.contains(h.as_str())))
        })
        .map(|(i, _)| *i)
}

/// Trimmed, lowercased text of a cell; `None` when empty
fn norm(cell: Option<&CellValue>) -> Option<String> {
    let s = cell?.to_string_value().trim().to_lowercase();
    (!s.is_empty()).then_some(s)
}

struct Columns {
    sales_agent: usize,
    sales_name: usize,
    sales_deposit: usize,
    sales_order_id: Option<usize>,
    leads_assigned: usize,
    leads_name: usize,
    leads_source: usize,
    leads_order_number: Option<usize>,
}

fn detect_columns(sales: &Table, leads: &Table, hints: &ColumnHints) -> Result<Columns> {
    let mut missing = Vec::new();
    let mut taken = Vec::new();
    let mut pick = |table: &Table, h: &[String], taken: &mut Vec<usize>, label: &str, required: bool| {
        let found = resolve(table, h, taken);
        match found {
            Some(i) => taken.push(i),
            None if required => missing.push(label.to_string()),
            None => {}
        }
        found
    };

    let sales_agent = pick(sales, &hints.sales_agent, &mut taken, "sales agent", true);
    let sales_deposit = pick(sales, &hints.sales_deposit, &mut taken, "sales deposit", true);
    let sales_order_id = pick(sales, &hints.sales_order_id, &mut taken, "sales order id", false);
    let sales_name = pick(sales, &hints.sales_name, &mut taken, "sales name", true);

    let mut taken = Vec::new();
    let leads_assigned = pick(leads, &hints.leads_assigned, &mut taken, "leads assigned", true);
    let leads_source = pick(leads, &hints.leads_source, &mut taken, "leads source", true);
    let leads_name = pick(leads, &hints.leads_name, &mut taken, "leads customer name", true);
    let leads_order_number =
        pick(leads, &hints.leads_order_number, &mut taken, "leads order number", false);

    match (sales_agent, sales_name, sales_deposit, leads_assigned, leads_name, leads_source) {
        (Some(sa), Some(sn), Some(sd), Some(la), Some(ln), Some(ls)) => Ok(Columns {
            sales_agent: sa,
            sales_name: sn,
            sales_deposit: sd,
            sales_order_id,
            leads_assigned: la,
            leads_name: ln,
            leads_source: ls,
            leads_order_number,
        }),
        _ => Err(Error::unknown_column(missing.join(", "))),
    }
}

/// A sale after deposit cleaning and per-order merging
struct Sale {
    order: Option<String>,
    agent: Option<String>,
    name: Option<String>,
    deposit: f64,
}

fn collect_sales(sales: &Table, cols: &Columns) -> Vec<Sale> {
    let mut merged: Vec<Sale> = Vec::new();
    let mut by_order: HashMap<(Option<String>, Option<String>, Option<String>), usize> =
        HashMap::new();

    for row in &sales.rows {
        let deposit = match row.get(cols.sales_deposit).and_then(|c| c.as_currency()) {
            Some(d) if d > 0.0 => d,
            _ => continue,
        };
        let sale = Sale {
            order: cols.sales_order_id.and_then(|i| norm(row.get(i))),
            agent: norm(row.get(cols.sales_agent)),
            name: norm(row.get(cols.sales_name)),
            deposit,
        };

        if cols.sales_order_id.is_none() {
            merged.push(sale);
            continue;
        }
        let key = (sale.order.clone(), sale.agent.clone(), sale.name.clone());
        match by_order.get(&key) {
            Some(&i) => merged[i].deposit += sale.deposit,
            None => {
                by_order.insert(key, merged.len());
                merged.push(sale);
            }
        }
    }
    merged
}

/// (key, agent) -> source, first lead row wins
fn lead_lookup(leads: &Table, key_col: usize, cols: &Columns) -> HashMap<(String, String), String> {
    let mut lookup = HashMap::new();
    for row in &leads.rows {
        let source = match row.get(cols.leads_source) {
            Some(cell) if !cell.is_missing() => cell.to_string_value(),
            _ => continue,
        };
        if let (Some(key), Some(agent)) = (norm(row.get(key_col)), norm(row.get(cols.leads_assigned))) {
            lookup.entry((key, agent)).or_insert(source);
        }
    }
    lookup
}

/// Normalize the assigned agent and drop repeated (phone, assigned, source) leads
///
/// The source column is required. Without a phone or assigned column the
/// leads cannot be told apart, so none are dropped.
pub fn clean_leads(leads: &Table, hints: &ColumnHints) -> Result<CleanedLeads> {
    let assigned = resolve(leads, &hints.leads_assigned, &[]);
    let mut taken: Vec<usize> = assigned.into_iter().collect();
    let source = resolve(leads, &hints.leads_source, &taken)
        .ok_or_else(|| Error::unknown_column("leads source"))?;
    taken.push(source);
    let phone = resolve(leads, &hints.leads_phone, &taken);

    let mut normalized = leads.clone();
    if let Some(col) = assigned {
        for row in &mut normalized.rows {
            if let Some(cell) = row.cells.get_mut(col) {
                *cell = norm(Some(&*cell)).map_or(CellValue::Missing, CellValue::Text);
            }
        }
    }

    let (table, removed) = match (phone, assigned) {
        (Some(phone), Some(assigned)) => {
            let keys = [phone, assigned, source].map(|i| leads.columns[i].name.clone());
            let deduped = dedupe(&normalized, &DedupeOptions::on(keys))?;
            (deduped.table, deduped.removed)
        }
        _ => {
            warn!("No phone or assigned column in leads, keeping every lead");
            (normalized, 0)
        }
    };

    let mut leads_per_source =
        summarize(&table, &SummaryRequest::count(leads.columns[source].name.clone()))?;
    leads_per_source.sort_by_key();
    info!(
        "Cleaned leads: {} duplicates removed, {} sources",
        removed,
        leads_per_source.groups.len()
    );

    Ok(CleanedLeads {
        table,
        removed,
        leads_per_source,
    })
}

/// Credit sales to lead sources and build the per-source report
pub fn attribute_sales(sales: &Table, leads: &Table, config: &AttributionConfig) -> Result<Attribution> {
    let cols = detect_columns(sales, leads, &config.hints)?;
    let cleaned = clean_leads(leads, &config.hints)?;
    let leads = &cleaned.table;
    let by_name = lead_lookup(leads, cols.leads_name, &cols);
    let by_order = cols
        .leads_order_number
        .map(|i| lead_lookup(leads, i, &cols))
        .unwrap_or_default();

    let records = collect_sales(sales, &cols);
    let sales_considered = records.len();

    // (source, name, agent) -> (deposit, order ids)
    let mut unique: BTreeMap<(String, String, String), (f64, BTreeSet<String>)> = BTreeMap::new();
    let mut unmatched = 0;

    for sale in records {
        let Some(agent) = sale.agent.clone() else {
            unmatched += 1;
            continue;
        };
        let name_source = sale
            .name
            .clone()
            .and_then(|n| by_name.get(&(n, agent.clone())).cloned());
        let order_source = match &sale.order {
            Some(order) if !by_order.is_empty() => by_order.get(&(order.clone(), agent.clone())).cloned(),
            _ => None,
        };

        let source = match (order_source, name_source) {
            (Some(o), Some(n)) if o != n => Some(n),
            (Some(o), _) => Some(o),
            (None, n) if sale.order.is_none() || by_order.is_empty() => n,
            (None, _) => None,
        };

        let Some(source) = source else {
            unmatched += 1;
            continue;
        };

        let entry = unique
            .entry((source, sale.name.unwrap_or_default(), agent))
            .or_insert((0.0, BTreeSet::new()));
        entry.0 += sale.deposit;
        if let Some(order) = sale.order {
            entry.1.insert(order);
        }
    }

    debug!(
        "{} of {} sales matched a lead source",
        sales_considered - unmatched,
        sales_considered
    );

    let mut matched = Table::new(MATCHED_COLUMNS);
    let mut deposits: BTreeMap<&str, (f64, usize)> = BTreeMap::new();
    for ((source, name, agent), (deposit, orders)) in &unique {
        let slot = deposits.entry(source.as_str()).or_insert((0.0, 0));
        slot.0 += deposit;
        slot.1 += 1;

        let orders = if orders.is_empty() {
            CellValue::Missing
        } else {
            CellValue::Text(orders.iter().cloned().collect::<Vec<_>>().join(", "))
        };
        matched.push_row(vec![
            CellValue::Text(source.clone()),
            CellValue::Text(name.clone()),
            CellValue::Text(agent.clone()),
            CellValue::Number(*deposit),
            orders,
        ]);
    }

    let mut report = Table::new(REPORT_COLUMNS);
    for group in &cleaned.leads_per_source.groups {
        let source = group.key.to_string_value();
        let (deposit_total, unique_sales) = deposits.get(source.as_str()).copied().unwrap_or((0.0, 0));
        let cost = config.lead_cost(&source);
        let total_cost = (group.rows as f64 * cost * 100.0).round() / 100.0;
        report.push_row(vec![
            group.key.clone(),
            CellValue::Number(group.rows as f64),
            CellValue::Number(deposit_total),
            CellValue::Number(unique_sales as f64),
            CellValue::Number(cost),
            CellValue::Number(total_cost),
        ]);
    }

    info!(
        "Attributed {} unique sales across {} lead sources ({} unmatched)",
        matched.row_count(),
        report.row_count(),
        unmatched
    );

    Ok(Attribution {
        matched,
        report,
        sales_considered,
        unmatched,
        leads_removed: cleaned.removed,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::parse_delimited_str;

    const LEADS: &str = "Number,Customer Name,Assigned To,Source,Phone\n\
        1001,Jane Doe,Amy,Web,555\n\
        1002,John Roe,Bob,Radio,556\n\
        1003,Ann Lee,Amy,Web,557\n\
        2000,Zed Cole, amy ,Email,558\n";

    const SALES: &str = "Order ID,Name,Agent,Deposit\n\
        1001,Jane Doe,AMY,\"$1,000\"\n\
        1001,Jane Doe,amy,$500\n\
        1002,John Roe,bob,250\n\
        1003,Zed Cole,amy,100\n\
        9999,Nobody,carl,50\n\
        1004,Ann Lee,amy,0\n";

    fn table(csv: &str, name: &str) -> Table {
        parse_delimited_str(csv, b',', name).unwrap()
    }

    fn text(s: &str) -> CellValue {
        CellValue::Text(s.to_string())
    }

    #[test]
    fn test_attribution_matches_and_merges() {
        let result = attribute_sales(&table(SALES, "sales.csv"), &table(LEADS, "leads.csv"), &AttributionConfig::default()).unwrap();

        assert_eq!(result.sales_considered, 4);
        assert_eq!(result.unmatched, 1);
        assert_eq!(result.matched.column_names(), MATCHED_COLUMNS.to_vec());
        assert_eq!(result.matched.row_count(), 3);

        // sorted by source, then name
        let email = &result.matched.rows[0].cells;
        assert_eq!(email[0], text("Email"));
        assert_eq!(email[1], text("zed cole"));
        assert_eq!(email[3], CellValue::Number(100.0));

        let web = &result.matched.rows[2].cells;
        assert_eq!(web[0], text("Web"));
        assert_eq!(web[3], CellValue::Number(1500.0));
        assert_eq!(web[4], text("1001"));
    }

    #[test]
    fn test_name_match_overrides_order_match() {
        let result = attribute_sales(&table(SALES, "sales.csv"), &table(LEADS, "leads.csv"), &AttributionConfig::default()).unwrap();
        // order 1003/amy is a Web lead, but Zed Cole/amy is an Email lead
        let zed = result
            .matched
            .rows
            .iter()
            .find(|r| r.cells[1] == text("zed cole"))
            .unwrap();
        assert_eq!(zed.cells[0], text("Email"));
    }

    #[test]
    fn test_report() {
        let mut config = AttributionConfig::default();
        config.lead_costs.insert("Web".to_string(), 2.5);
        let result = attribute_sales(&table(SALES, "sales.csv"), &table(LEADS, "leads.csv"), &config).unwrap();
        let report = &result.report;

        assert_eq!(report.column_names(), REPORT_COLUMNS.to_vec());
        assert_eq!(report.row_count(), 3);
        let sources: Vec<String> = report.rows.iter().map(|r| r.cells[0].to_string()).collect();
        assert_eq!(sources, vec!["Email", "Radio", "Web"]);

        let web = &report.rows[2].cells;
        assert_eq!(web[1], CellValue::Number(2.0));
        assert_eq!(web[2], CellValue::Number(1500.0));
        assert_eq!(web[3], CellValue::Number(1.0));
        assert_eq!(web[4], CellValue::Number(2.5));
        assert_eq!(web[5], CellValue::Number(5.0));

        let radio = &report.rows[1].cells;
        assert_eq!(radio[4], CellValue::Number(1.0));
        assert_eq!(radio[5], CellValue::Number(1.0));
    }

    #[test]
    fn test_sales_without_order_ids_match_by_name() {
        let sales = "Name,Agent,Deposit\nJohn Roe,Bob,$75\n";
        let result = attribute_sales(&table(sales, "sales.csv"), &table(LEADS, "leads.csv"), &AttributionConfig::default()).unwrap();

        assert_eq!(result.unmatched, 0);
        assert_eq!(result.matched.rows[0].cells[0], text("Radio"));
        assert_eq!(result.matched.rows[0].cells[4], CellValue::Missing);
    }

    #[test]
    fn test_missing_columns_are_reported_together() {
        let sales = "Order ID,Name\n1,x\n";
        let leads = "Customer Name,Source\nx,Web\n";
        let err = attribute_sales(&table(sales, "sales.csv"), &table(leads, "leads.csv"), &AttributionConfig::default()).unwrap_err();

        match err {
            Error::UnknownColumn { column } => {
                assert!(column.contains("sales agent"));
                assert!(column.contains("sales deposit"));
                assert!(column.contains("leads assigned"));
                assert!(!column.contains("leads source"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_clean_leads_drops_repeated_leads() {
        let leads = "Number,Customer Name,Assigned To,Source,Phone\n\
            1,Jane,Amy,Web,555\n\
            1,Jane, amy ,Web,555\n\
            2,Jane,amy,Radio,555\n\
            3,John,Bob,Web,556\n";
        let cleaned = clean_leads(&table(leads, "leads.csv"), &ColumnHints::default()).unwrap();

        assert_eq!(cleaned.removed, 1);
        assert_eq!(cleaned.table.row_count(), 3);
        assert_eq!(cleaned.table.rows[0].cells[2], text("amy"));
        assert_eq!(cleaned.table.rows[2].cells[2], text("bob"));
        assert_eq!(cleaned.leads_per_source.get_text("Web"), Some(2.0));
        assert_eq!(cleaned.leads_per_source.get_text("Radio"), Some(1.0));
    }

    #[test]
    fn test_clean_leads_without_phone_keeps_every_lead() {
        let leads = "Assigned To,Source\nAmy,Web\namy,Web\n";
        let cleaned = clean_leads(&table(leads, "leads.csv"), &ColumnHints::default()).unwrap();

        assert_eq!(cleaned.removed, 0);
        assert_eq!(cleaned.table.rows[1].cells[0], text("amy"));
        assert_eq!(cleaned.leads_per_source.get_text("Web"), Some(2.0));

        let no_source = table("Phone,Assigned To\n1,amy\n", "leads.csv");
        let err = clean_leads(&no_source, &ColumnHints::default()).unwrap_err();
        assert!(matches!(err, Error::UnknownColumn { column } if column == "leads source"));
    }

    #[test]
    fn test_duplicate_leads_are_counted_once() {
        let leads = "Number,Customer Name,Assigned To,Source,Phone\n\
            1,Jane,Amy,Web,555\n\
            1,Jane,amy,Web,555\n";
        let sales = "Order ID,Name,Agent,Deposit\n1,Jane,amy,100\n";
        let mut config = AttributionConfig::default();
        config.lead_costs.insert("Web".to_string(), 3.0);
        let result = attribute_sales(&table(sales, "sales.csv"), &table(leads, "leads.csv"), &config).unwrap();

        assert_eq!(result.leads_removed, 1);
        assert_eq!(result.report.row_count(), 1);
        let web = &result.report.rows[0].cells;
        assert_eq!(web[0], text("Web"));
        assert_eq!(web[1], CellValue::Number(1.0));
        assert_eq!(web[5], CellValue::Number(3.0));
        assert_eq!(result.matched.row_count(), 1);
    }

    #[test]
    fn test_resolve_prefers_exact_name() {
        let t = Table::new(["Agent Name", "Name"]);
        assert_eq!(resolve(&t, &hints(&["name"]), &[]), Some(1));
        assert_eq!(resolve(&t, &hints(&["agent"]), &[]), Some(0));
        assert_eq!(resolve(&t, &hints(&["name"]), &[1]), Some(0));
    }
}
