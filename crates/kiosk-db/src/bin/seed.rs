//! # Seed Data Generator
//!
//! Bootstraps a local database from the bundled schema and fills it with
//! demo orders for development.
//!
//! ## Usage
//! ```bash
//! # Generate 200 orders (default) over the last 7 days
//! cargo run -p kiosk-db --bin seed
//!
//! # Generate custom amount
//! cargo run -p kiosk-db --bin seed -- --count 1000
//!
//! # Start from an empty database
//! cargo run -p kiosk-db --bin seed -- --reset
//!
//! # Only remove every order
//! cargo run -p kiosk-db --bin seed -- --clear --count 0
//! ```
//!
//! ## Generated Orders
//! - Staff ids rotate through a small roster
//! - 1-4 line items from a fixed menu, stored as JSON
//! - Every 9th order pays by card with a slip reference
//! - Every 25th order is voided afterwards

use std::env;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use chrono::{Duration, Utc};
use kiosk_core::{NewOrder, SyncStatus};
use kiosk_db::{Database, DbConfig, ResetMode, StaticSchema, SCHEMA_SQL};
use serde_json::json;
use tracing_subscriber::EnvFilter;

/// Menu items: (sku, name, price in cents)
const MENU: &[(&str, &str, i64)] = &[
    ("TEA-01", "Milk Tea", 450),
    ("TEA-02", "Jasmine Tea", 380),
    ("TEA-03", "Taro Tea", 520),
    ("COF-01", "Americano", 400),
    ("COF-02", "Latte", 550),
    ("SNK-01", "Egg Tart", 300),
    ("SNK-02", "Pineapple Bun", 280),
    ("SNK-03", "Fish Ball Cup", 350),
];

const STAFF: &[&str] = &["staff-001", "staff-002", "staff-003", "staff-004"];

/// Days of history to spread orders across
const HISTORY_DAYS: i64 = 7;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();

    let args: Vec<String> = env::args().collect();

    let mut count: usize = 200;
    let mut db_path = PathBuf::from("./kiosk_dev.db");
    let mut clear = false;
    let mut reset = false;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--count" | "-c" => {
                if i + 1 < args.len() {
                    count = args[i + 1].parse().unwrap_or(200);
                    i += 1;
                }
            }
            "--db" | "-d" => {
                if i + 1 < args.len() {
                    db_path = PathBuf::from(&args[i + 1]);
                    i += 1;
                }
            }
            "--clear" => clear = true,
            "--reset" => reset = true,
            "--help" | "-h" => {
                println!("Kiosk POS Seed Data Generator");
                println!();
                println!("Usage: seed [OPTIONS]");
                println!();
                println!("Options:");
                println!("  -c, --count <N>    Number of orders to generate (default: 200)");
                println!("  -d, --db <PATH>    Database file path (default: ./kiosk_dev.db)");
                println!("      --clear        Delete every order before generating");
                println!("      --reset        Drop the whole database before bootstrapping");
                println!("  -h, --help         Show this help message");
                return Ok(());
            }
            other => eprintln!("Ignoring unknown argument: {other}"),
        }
        i += 1;
    }

    println!("🌱 Kiosk POS Seed Data Generator");
    println!("================================");
    println!("Database: {}", db_path.display());
    println!("Orders:   {}", count);
    println!();

    let db = Database::open(DbConfig::new(&db_path))
        .await?
        .with_schema_source(Arc::new(StaticSchema::new(SCHEMA_SQL)));
    println!("✓ Connected to database");

    if reset {
        match db.reset().await? {
            ResetMode::Physical => println!("✓ Database files removed"),
            ResetMode::Logical => println!("✓ Database objects dropped"),
        }
    }

    let report = db.bootstrap(None).await?;
    println!(
        "✓ Schema ready ({} statements, {:?})",
        report.statements, report.path
    );

    let orders = db.orders();

    if clear {
        let deleted = orders.delete_all().await?;
        println!("✓ Deleted {} orders", deleted);
    }

    println!();
    println!("Generating orders...");

    let start = Instant::now();
    let now_ms = Utc::now().timestamp_millis();
    let span_ms = Duration::days(HISTORY_DAYS).num_milliseconds();
    let mut generated = 0;
    let mut voided = 0;

    for seed in 0..count {
        // Spread evenly back from now, oldest first
        let age = span_ms - (span_ms / count.max(1) as i64) * seed as i64;
        let order = generate_order(seed, now_ms - age);

        let id = match orders.create(&order).await {
            Ok(id) => id,
            Err(e) => {
                eprintln!("Failed to insert order {}: {}", seed, e);
                continue;
            }
        };
        generated += 1;

        if seed % 25 == 24 {
            orders.void(id).await?;
            voided += 1;
        } else if seed % 3 == 0 {
            orders.update_sync_status(id, SyncStatus::Synced).await?;
        }

        if generated % 100 == 0 {
            println!("  Generated {} orders...", generated);
        }
    }

    let elapsed = start.elapsed();
    println!();
    println!(
        "✓ Generated {} orders ({} voided) in {:?}",
        generated, voided, elapsed
    );

    let total = orders.get_total_sales(None, None).await?;
    let completed = orders.get_order_count(None, None).await?;
    let since = now_ms - Duration::days(1).num_milliseconds();
    let last_day = orders.get_total_sales(Some(since), Some(now_ms)).await?;

    println!();
    println!("Totals:");
    println!("  Completed orders: {}", completed);
    println!("  All-time sales:   {}", format_cents(total));
    println!("  Last 24 hours:    {}", format_cents(last_day));

    println!();
    println!("✓ Seed complete!");

    db.close().await;
    Ok(())
}

/// Initializes logging. `RUST_LOG` overrides the default filter.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,kiosk_db=debug,sqlx=warn"));

    tracing_subscriber::fmt().with_env_filter(filter).init();
}

/// Generates a single order with deterministic contents.
fn generate_order(seed: usize, order_timestamp: i64) -> NewOrder {
    let lines = 1 + seed % 4;
    let mut items = Vec::with_capacity(lines);
    let mut subtotal = 0;

    for line in 0..lines {
        let (sku, name, price) = MENU[(seed * 7 + line * 3) % MENU.len()];
        let qty = 1 + ((seed + line) % 3) as i64;
        subtotal += price * qty;
        items.push(json!({ "sku": sku, "name": name, "qty": qty, "price_cents": price }));
    }

    let misc_fee = if seed % 10 == 0 { 100 } else { 0 };
    let total = subtotal + misc_fee;
    let discount = if seed % 7 == 0 { total / 10 } else { 0 };
    let net = total - discount;

    let by_card = seed % 9 == 0;
    let received = if by_card {
        net
    } else {
        // Round cash up to the next 5.00
        (net / 500 + 1) * 500
    };

    NewOrder {
        staff_id: STAFF[seed % STAFF.len()].to_string(),
        order_timestamp,
        products: serde_json::Value::Array(items).to_string(),
        products_subtotal_cents: subtotal,
        misc_fee_cents: misc_fee,
        total_cents: total,
        discount_cents: discount,
        net_amount_cents: net,
        net_received_cents: received,
        change_cents: received - net,
        payment_reference: by_card.then(|| format!("SLIP-{:06}", seed)),
        payment_method: by_card.then(|| "card".to_string()),
        is_override: Some(discount > 0 && seed % 2 == 0),
        ..Default::default()
    }
}

fn format_cents(cents: i64) -> String {
    format!("${}.{:02}", cents / 100, (cents % 100).abs())
}
