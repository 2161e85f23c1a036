//! Corpus statistics and health overview.
//!
//! Provides a quick summary of what's indexed: document counts, chunk and
//! vector counts, and a per-document breakdown. Used by `strata stats` to
//! give confidence that ingestion runs are working as expected.

use anyhow::Result;
use sqlx::Row;

use crate::config::Config;
use crate::db;

struct DocumentStats {
    id: String,
    filename: String,
    status: String,
    chunk_count: i64,
    vector_count: i64,
}

/// Run the stats command: query the database and print a summary.
pub async fn run_stats(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;

    let total_docs: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM documents")
        .fetch_one(&pool)
        .await?;
    let total_chunks: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chunks")
        .fetch_one(&pool)
        .await?;
    let total_vectors: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM vectors")
        .fetch_one(&pool)
        .await?;

    let db_size = std::fs::metadata(&config.db.path)
        .map(|m| m.len())
        .unwrap_or(0);

    println!("strata — corpus stats");
    println!("=====================");
    println!();
    println!("  Database:   {}", config.db.path.display());
    println!("  Size:       {}", format_bytes(db_size));
    println!();
    println!("  Documents:  {}", total_docs);
    println!("  Chunks:     {}", total_chunks);
    println!("  Vectors:    {}", total_vectors);

    let rows = sqlx::query(
        r#"
        SELECT d.id, d.filename, d.status,
               (SELECT COUNT(*) FROM chunks c WHERE c.document_id = d.id) AS chunk_count,
               (SELECT COUNT(*) FROM vectors v WHERE v.document_id = d.id) AS vector_count
        FROM documents d
        ORDER BY d.created_at DESC
        "#,
    )
    .fetch_all(&pool)
    .await?;

    if !rows.is_empty() {
        println!();
        println!("  Per document:");
        for row in &rows {
            let stats = DocumentStats {
                id: row.get("id"),
                filename: row.get("filename"),
                status: row.get("status"),
                chunk_count: row.get("chunk_count"),
                vector_count: row.get("vector_count"),
            };
            println!(
                "    {}  [{}]  {} chunks, {} vectors  ({})",
                stats.id, stats.status, stats.chunk_count, stats.vector_count, stats.filename
            );
        }
    }

    pool.close().await;
    Ok(())
}

fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KB", "MB", "GB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} B")
    } else {
        format!("{value:.1} {}", UNITS[unit])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_bytes_scales_units() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(2048), "2.0 KB");
        assert_eq!(format_bytes(5 * 1024 * 1024), "5.0 MB");
    }
}
