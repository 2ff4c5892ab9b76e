//! Rendering of typed statements to SQL text.

use super::{
    BatchCursor, BoundValue, ConstraintKind, Identifier, InsertBatch, IntervalExpr,
    PartitionBound, PartitionClause, PartitionDef, PartitionMethod, Statement,
    SubpartitionClause, SubpartitionKind,
};

/// Renders statements for a particular engine.
pub trait Dialect: Send + Sync {
    /// Dialect name, recorded in audit context.
    fn name(&self) -> &'static str;

    /// Render a statement to executable text.
    fn render(&self, statement: &Statement) -> String;
}

/// Dialect for engines with declarative RANGE/LIST/HASH/INTERVAL/REFERENCE
/// partitioning, online moves and a `DBMS_STATS`-style statistics package.
#[derive(Debug, Clone, Copy, Default)]
pub struct StandardDialect;

impl Dialect for StandardDialect {
    fn name(&self) -> &'static str {
        "standard"
    }

    fn render(&self, statement: &Statement) -> String {
        match statement {
            Statement::CreateTable {
                table,
                columns,
                constraints,
                partitioning,
                location,
            } => {
                let cols = columns
                    .iter()
                    .map(|c| {
                        if c.nullable {
                            format!("{} {}", c.name, c.data_type)
                        } else {
                            format!("{} {} NOT NULL", c.name, c.data_type)
                        }
                    })
                    .chain(constraints.iter().map(|c| {
                        format!("CONSTRAINT {} {}", c.name, render_constraint_body(&c.kind, &c.columns))
                    }))
                    .collect::<Vec<_>>()
                    .join(", ");
                let mut sql = format!("CREATE TABLE {table} ({cols})");
                if let Some(location) = location {
                    sql.push_str(&format!(" TABLESPACE {location}"));
                }
                if let Some(clause) = partitioning {
                    sql.push(' ');
                    sql.push_str(&render_partition_clause(clause));
                }
                sql
            }
            Statement::CreateTableAs {
                table,
                source,
                columns,
                with_data,
                parallel_degree,
                location,
            } => {
                let mut sql = format!("CREATE TABLE {table}");
                if let Some(location) = location {
                    sql.push_str(&format!(" TABLESPACE {location}"));
                }
                sql.push_str(&format!(
                    " PARALLEL {parallel_degree} NOLOGGING AS SELECT {} FROM {source}",
                    column_list(columns)
                ));
                if !with_data {
                    sql.push_str(" WHERE 1 = 0");
                }
                sql
            }
            Statement::DropTable { table, purge } => {
                if *purge {
                    format!("DROP TABLE {table} PURGE")
                } else {
                    format!("DROP TABLE {table}")
                }
            }
            Statement::RenameTable { from, to } => format!("ALTER TABLE {from} RENAME TO {to}"),
            Statement::InsertBatch(batch) => render_insert_batch(batch),
            Statement::CreateIndex {
                index,
                table,
                columns,
                unique,
                local,
                online,
                parallel_degree,
            } => {
                let mut sql = format!(
                    "CREATE {}INDEX {index} ON {table} ({})",
                    if *unique { "UNIQUE " } else { "" },
                    join(columns)
                );
                if *local {
                    sql.push_str(" LOCAL");
                }
                if *online {
                    sql.push_str(" ONLINE");
                }
                sql.push_str(&format!(" PARALLEL {parallel_degree}"));
                sql
            }
            Statement::RebuildIndex {
                index,
                online,
                parallel_degree,
            } => format!(
                "ALTER INDEX {index} REBUILD{} PARALLEL {parallel_degree}",
                if *online { " ONLINE" } else { "" }
            ),
            Statement::AddConstraint {
                constraint,
                table,
                kind,
                columns,
            } => {
                let body = render_constraint_body(kind, columns);
                format!("ALTER TABLE {table} ADD CONSTRAINT {constraint} {body}")
            }
            Statement::GatherStatistics {
                table,
                sampling_percent,
                parallel_degree,
                cascade,
            } => format!(
                "BEGIN DBMS_STATS.GATHER_TABLE_STATS(ownname => USER, tabname => '{table}', \
                 estimate_percent => {sampling_percent}, degree => {parallel_degree}, \
                 cascade => {}); END;",
                if *cascade { "TRUE" } else { "FALSE" }
            ),
            Statement::AddPartition { table, partition } => {
                format!("ALTER TABLE {table} ADD {}", render_partition_def(partition))
            }
            Statement::DropPartition {
                table,
                partition,
                update_indexes,
            } => format!(
                "ALTER TABLE {table} DROP PARTITION {partition}{}",
                if *update_indexes { " UPDATE INDEXES" } else { "" }
            ),
            Statement::SplitPartition {
                table,
                partition,
                at,
                into,
            } => format!(
                "ALTER TABLE {table} SPLIT PARTITION {partition} AT ({}) INTO (PARTITION {}, PARTITION {})",
                render_bound(at),
                into.0,
                into.1
            ),
            Statement::MergePartitions {
                table,
                first,
                second,
                into,
            } => format!("ALTER TABLE {table} MERGE PARTITIONS {first}, {second} INTO PARTITION {into}"),
            Statement::MoveObject {
                table,
                partition,
                location,
                online,
                parallel_degree,
            } => {
                let mut sql = format!("ALTER TABLE {table} MOVE");
                if let Some(partition) = partition {
                    sql.push_str(&format!(" PARTITION {partition}"));
                }
                if *online {
                    sql.push_str(" ONLINE");
                }
                sql.push_str(&format!(" TABLESPACE {location} PARALLEL {parallel_degree}"));
                sql
            }
        }
    }
}

fn render_constraint_body(kind: &ConstraintKind, columns: &[Identifier]) -> String {
    match kind {
        ConstraintKind::PrimaryKey => format!("PRIMARY KEY ({})", join(columns)),
        ConstraintKind::Unique => format!("UNIQUE ({})", join(columns)),
        ConstraintKind::ForeignKey {
            references,
            ref_columns,
        } => format!(
            "FOREIGN KEY ({}) REFERENCES {references} ({})",
            join(columns),
            join(ref_columns)
        ),
        ConstraintKind::Check { condition } => format!("CHECK ({condition})"),
    }
}

fn join(columns: &[Identifier]) -> String {
    columns
        .iter()
        .map(Identifier::as_str)
        .collect::<Vec<_>>()
        .join(", ")
}

fn column_list(columns: &[Identifier]) -> String {
    if columns.is_empty() {
        "*".to_string()
    } else {
        join(columns)
    }
}

fn render_bound(bound: &BoundValue) -> String {
    match bound {
        BoundValue::MaxValue => "MAXVALUE".to_string(),
        BoundValue::Default => "DEFAULT".to_string(),
        BoundValue::Literal(value) => value.to_string(),
    }
}

fn render_interval(interval: &IntervalExpr) -> String {
    match interval {
        IntervalExpr::Days(n) => format!("NUMTODSINTERVAL({n}, 'DAY')"),
        IntervalExpr::Months(n) => format!("NUMTOYMINTERVAL({n}, 'MONTH')"),
        IntervalExpr::Years(n) => format!("NUMTOYMINTERVAL({n}, 'YEAR')"),
        IntervalExpr::Numeric(n) => n.to_string(),
    }
}

fn render_partition_def(def: &PartitionDef) -> String {
    let bound = match &def.bound {
        PartitionBound::LessThan(b) => format!("VALUES LESS THAN ({})", render_bound(b)),
        PartitionBound::In(values) => format!(
            "VALUES ({})",
            values.iter().map(render_bound).collect::<Vec<_>>().join(", ")
        ),
    };
    match &def.location {
        Some(location) => format!("PARTITION {} {bound} TABLESPACE {location}", def.name),
        None => format!("PARTITION {} {bound}", def.name),
    }
}

fn render_partition_list(partitions: &[PartitionDef]) -> String {
    if partitions.is_empty() {
        return String::new();
    }
    format!(
        " ({})",
        partitions
            .iter()
            .map(render_partition_def)
            .collect::<Vec<_>>()
            .join(", ")
    )
}

fn render_subpartition(sub: &SubpartitionClause) -> String {
    match &sub.kind {
        SubpartitionKind::Hash { count } => {
            format!(" SUBPARTITION BY HASH ({}) SUBPARTITIONS {count}", sub.column)
        }
        SubpartitionKind::List => format!(
            " SUBPARTITION BY LIST ({}) SUBPARTITION TEMPLATE (SUBPARTITION SP_DEFAULT VALUES (DEFAULT))",
            sub.column
        ),
        SubpartitionKind::Range => format!(
            " SUBPARTITION BY RANGE ({}) SUBPARTITION TEMPLATE (SUBPARTITION SP_MAX VALUES LESS THAN (MAXVALUE))",
            sub.column
        ),
    }
}

fn render_partition_clause(clause: &PartitionClause) -> String {
    let sub = clause
        .subpartition
        .as_ref()
        .map(render_subpartition)
        .unwrap_or_default();

    match &clause.method {
        PartitionMethod::Range {
            column,
            partitions,
            interval,
        } => {
            let interval = interval
                .as_ref()
                .map(|i| format!(" INTERVAL ({})", render_interval(i)))
                .unwrap_or_default();
            format!(
                "PARTITION BY RANGE ({column}){interval}{sub}{}",
                render_partition_list(partitions)
            )
        }
        PartitionMethod::List {
            column,
            partitions,
            automatic,
        } => format!(
            "PARTITION BY LIST ({column}){}{sub}{}",
            if *automatic { " AUTOMATIC" } else { "" },
            render_partition_list(partitions)
        ),
        PartitionMethod::Hash { column, partitions } => {
            format!("PARTITION BY HASH ({column}){sub} PARTITIONS {partitions}")
        }
        PartitionMethod::Reference { constraint } => {
            format!("PARTITION BY REFERENCE ({constraint})")
        }
    }
}

fn render_insert_batch(batch: &InsertBatch) -> String {
    let InsertBatch {
        target,
        source,
        columns,
        limit,
        cursor,
        parallel_degree,
    } = batch;

    let head = format!(
        "INSERT /*+ APPEND PARALLEL({target}, {parallel_degree}) */ INTO {target} ({})",
        join(columns)
    );

    match cursor {
        BatchCursor::Watermark { key, after } => {
            let filter = after
                .as_ref()
                .map(|v| format!(" WHERE {key} > {v}"))
                .unwrap_or_default();
            format!(
                "{head} SELECT {} FROM {source}{filter} ORDER BY {key} FETCH FIRST {limit} ROWS ONLY",
                join(columns)
            )
        }
        BatchCursor::RowPosition { skip } => format!(
            "{head} SELECT {} FROM {source} ORDER BY ROWID OFFSET {skip} ROWS FETCH NEXT {limit} ROWS ONLY",
            join(columns)
        ),
        BatchCursor::AntiJoin { match_columns } => {
            let selected = columns
                .iter()
                .map(|c| format!("s.{c}"))
                .collect::<Vec<_>>()
                .join(", ");
            let predicate = match_columns
                .iter()
                .map(|c| format!("t.{c} = s.{c}"))
                .collect::<Vec<_>>()
                .join(" AND ");
            format!(
                "{head} SELECT {selected} FROM {source} s WHERE NOT EXISTS \
                 (SELECT 1 FROM {target} t WHERE {predicate}) FETCH FIRST {limit} ROWS ONLY"
            )
        }
    }
}
