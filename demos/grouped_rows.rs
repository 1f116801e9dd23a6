/// Grouped rows demo
///
/// Builds a small sales grid grouped by region, sums the amounts into group
/// footers, filters and sorts it, and prints the rows of the first page.
/// Run with `RUST_LOG=debug` to watch the stages recompute.

use rowpipe::*;
use std::collections::HashMap;

fn sale(id: i64, region: &str, rep: &str, amount: f64) -> RowRecord {
    let mut row = HashMap::new();
    row.insert("id".to_string(), CellValue::Int(id));
    row.insert("region".to_string(), CellValue::from(region));
    row.insert("rep".to_string(), CellValue::from(rep));
    row.insert("amount".to_string(), CellValue::Float(amount));
    row
}

fn print_rows(pipeline: &GridPipeline) {
    for id in pipeline.get_visible_rows(true) {
        let node = match pipeline.get_row_node(id) {
            Some(node) => node,
            None => continue,
        };
        let indent = "  ".repeat(node.depth().max(0) as usize);
        match node {
            RowNode::Group(group) => {
                let total = pipeline
                    .get_aggregated_value(id, "amount")
                    .map(|v| v.to_string())
                    .unwrap_or_default();
                println!("{}[{}] total {}", indent, group.grouping_key, total);
            }
            RowNode::Leaf(leaf) => {
                let rep = pipeline.rows().value(&leaf.row_id, "rep");
                let amount = pipeline.rows().value(&leaf.row_id, "amount");
                println!("{}{} {} {}", indent, leaf.row_id, rep, amount);
            }
            RowNode::Footer(_) => {}
        }
    }
}

fn main() -> Result<()> {
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));

    let config = PipelineConfig {
        pagination_enabled: true,
        pagination_model: PaginationModel::new(0, 20),
        aggregation_placement: AggregationPlacement::Inline,
        execution_mode: ExecutionMode::Fast,
        ..Default::default()
    };
    let mut pipeline = GridPipeline::new(
        vec![
            ColumnDef::number("id"),
            ColumnDef::string("region").with_width(120.0),
            ColumnDef::string("rep").with_width(160.0),
            ColumnDef::number("amount"),
        ],
        config,
    );
    pipeline.subscribe(|event| log::info!("event: {}", event.name()));

    pipeline.begin_batch();
    pipeline.set_rows(vec![
        sale(1, "EU", "Ana", 1200.0),
        sale(2, "US", "Bob", 800.0),
        sale(3, "EU", "Chen", 430.5),
        sale(4, "APAC", "Dee", 990.0),
        sale(5, "US", "Eli", 2100.0),
        sale(6, "EU", "Fay", 75.0),
    ])?;
    pipeline.set_row_grouping_model(vec!["region".to_string()])?;
    let mut aggregation = AggregationModel::new();
    aggregation.insert("amount".to_string(), "sum".to_string());
    pipeline.set_aggregation_model(aggregation)?;
    pipeline.set_viewport_size(Size::new(640.0, 480.0))?;
    pipeline.end_batch()?;

    println!("-- grouped by region");
    print_rows(&pipeline);

    pipeline.set_sort_model(vec![SortItem::desc("amount")])?;
    pipeline.set_filter_model(FilterModel::with_items(vec![FilterItem::new("amount", ">=", 500)]))?;
    println!("-- amount >= 500, largest first");
    print_rows(&pipeline);

    let window = pipeline.render_window();
    println!(
        "render window: rows {:?}, columns {:?}",
        window.rows(),
        window.columns()
    );
    println!("state: {}", pipeline.export_state(true).to_json()?);
    Ok(())
}
