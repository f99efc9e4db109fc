#!/usr/bin/env rust-script
//! MAU Snapshot Backfill Script
//!
//! Recomputes MAU snapshots for a closed billing period across all active
//! tenants, directly against the database. Because snapshots are upserted
//! on (tenant_id, billing_period), re-running is always safe.
//!
//! ## Usage
//! ```bash
//! # Dry run (preview counts without writing)
//! cargo run --bin backfill_snapshots -- 2026-06
//!
//! # Apply
//! cargo run --bin backfill_snapshots -- 2026-06 --apply
//! ```
//!
//! ## Environment Variables
//! - DATABASE_URL: PostgreSQL connection string

use std::env;
use std::error::Error;

#[derive(Debug)]
struct BackfillAction {
    tenant_id: uuid::Uuid,
    tenant_name: String,
    old_count: Option<i64>,
    new_count: i64,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    println!("Authmesh MAU Snapshot Backfill");
    println!("================================\n");

    let args: Vec<String> = env::args().collect();
    let period = args
        .iter()
        .skip(1)
        .find(|a| !a.starts_with("--"))
        .cloned()
        .ok_or("usage: backfill_snapshots <YYYY-MM> [--apply]")?;
    let dry_run = !args.contains(&"--apply".to_string());

    if period.len() != 7 || period.as_bytes()[4] != b'-' {
        return Err(format!("invalid period '{}': expected YYYY-MM", period).into());
    }

    if dry_run {
        println!("DRY RUN MODE - No changes will be applied");
        println!("   Use --apply flag to execute changes\n");
    } else {
        println!("LIVE MODE - Snapshots will be overwritten for {}\n", period);
    }

    dotenvy::dotenv().ok();
    let database_url = env::var("DATABASE_URL")?;
    let pool = sqlx::postgres::PgPool::connect(&database_url).await?;
    println!("Connected to database\n");

    let period_start = format!("{}-01T00:00:00Z", period);

    println!("Recomputing MAU for period {}...", period);

    let rows: Vec<(uuid::Uuid, String, i64, Option<i64>)> = sqlx::query_as(
        r#"
        SELECT
            t.id,
            t.name,
            COALESCE(mau.count, 0)::BIGINT as new_count,
            s.mau_count as old_count
        FROM tenants t
        LEFT JOIN LATERAL (
            SELECT COUNT(DISTINCT ae.user_id) as count
            FROM activity_events ae
            JOIN users u ON u.id = ae.user_id AND u.is_active
            WHERE ae.tenant_id = t.id
              AND ae.occurred_at >= $1::timestamptz
              AND ae.occurred_at < $1::timestamptz + INTERVAL '1 month'
        ) mau ON true
        LEFT JOIN mau_snapshots s
            ON s.tenant_id = t.id AND s.billing_period = $2
        WHERE t.is_active = TRUE
        ORDER BY t.created_at ASC
        "#,
    )
    .bind(&period_start)
    .bind(&period)
    .fetch_all(&pool)
    .await?;

    let actions: Vec<BackfillAction> = rows
        .into_iter()
        .map(|(tenant_id, tenant_name, new_count, old_count)| BackfillAction {
            tenant_id,
            tenant_name,
            old_count,
            new_count,
        })
        .collect();

    println!("Found {} active tenants:\n", actions.len());
    for (i, action) in actions.iter().enumerate() {
        let old = action
            .old_count
            .map(|c| c.to_string())
            .unwrap_or_else(|| "none".to_string());
        println!(
            "{}. {} ({}) snapshot {} -> {}",
            i + 1,
            action.tenant_name,
            action.tenant_id,
            old,
            action.new_count
        );
    }

    if dry_run {
        println!("\nThis was a dry run. No changes were applied.");
        println!("Run with --apply flag to write these snapshots.");
        return Ok(());
    }

    println!("\nWriting snapshots...");
    for action in &actions {
        sqlx::query(
            r#"
            INSERT INTO mau_snapshots (
                id, tenant_id, billing_period, period_start, period_end,
                mau_count, users, created_at, updated_at
            ) VALUES (
                gen_random_uuid(), $1, $2, $3::timestamptz,
                $3::timestamptz + INTERVAL '1 month' - INTERVAL '1 second',
                $4, '[]', NOW(), NOW()
            )
            ON CONFLICT (tenant_id, billing_period) DO UPDATE SET
                mau_count = EXCLUDED.mau_count,
                updated_at = NOW()
            "#,
        )
        .bind(action.tenant_id)
        .bind(&period)
        .bind(&period_start)
        .bind(action.new_count)
        .execute(&pool)
        .await?;
    }

    println!("\n================================");
    println!("Backfill Complete");
    println!("================================");
    println!("Wrote {} snapshots for {}", actions.len(), period);

    Ok(())
}
