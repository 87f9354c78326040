//! Quad Store Walkthrough
//!
//! Demonstrates the full engine pipeline:
//! 1. Building a graph through a transaction
//! 2. Running an optimized intersection query
//! 3. Inspecting the rewritten cursor tree
//! 4. Snapshotting the store and restoring it

use anyhow::{anyhow, Result};

use quadriga_engine::{
    apply_transaction, optimize, And, Cursor, EngineConfig, OptimizeContext, QuadStore, Ref,
    Transaction,
};
use quadriga_memstore::MemStore;
use quadriga_quad::{Direction, Quad, Value};

fn resolve(store: &MemStore, name: &str) -> Result<Ref> {
    store
        .resolve(&Value::from(name))?
        .ok_or_else(|| anyhow!("{name} is not in the store"))
}

fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    println!("╔══════════════════════════════════════════════════════════════╗");
    println!("║           QUADRIGA QUAD STORE WALKTHROUGH                    ║");
    println!("╚══════════════════════════════════════════════════════════════╝");
    println!();

    // ========================================================================
    // Step 1: Build the graph
    // ========================================================================

    println!("━━━ Step 1: Building the Graph ━━━");
    println!();

    let mut store = MemStore::new();
    let mut tx = Transaction::new();
    tx.add_quad(Quad::new("cats", "are", "awesome"));
    tx.add_quad(Quad::new("cats", "are", "scary"));
    tx.add_quad(Quad::new("cats", "want", "kill"));
    tx.add_quad(Quad::new("dogs", "are", "loyal"));
    tx.add_quad(Quad::with_label("cats", "are", "scary", "opinions"));
    apply_transaction(&mut store, &tx)?;

    println!("  Applied {} deltas", tx.len());
    println!("  • {} quads stored", store.quad_count());
    println!("  • {} distinct node values", store.node_count());
    println!();

    // ========================================================================
    // Step 2: Query — what are cats?
    // ========================================================================

    println!("━━━ Step 2: Query — what are cats? ━━━");
    println!();

    let cats = resolve(&store, "cats")?;
    let are = resolve(&store, "are")?;

    let mut by_subject = store.scan(Direction::Subject, cats)?;
    by_subject.add_tag("quad");
    let by_predicate = store.scan(Direction::Predicate, are)?;
    let tree: Box<dyn Cursor> = Box::new(And::new(vec![by_subject, by_predicate]));

    let config = EngineConfig::default();
    let ctx = OptimizeContext::with_store(&store, &config);
    let mut query = optimize(tree, &ctx);

    while query.advance() {
        let Some(hit) = query.result() else {
            continue;
        };
        let quad = store.quad(hit)?;
        match &quad.label {
            Some(label) => println!("  • cats are {} (label: {label})", quad.object),
            None => println!("  • cats are {}", quad.object),
        }
    }
    if let Some(err) = query.error() {
        return Err(anyhow!("query failed: {err}"));
    }
    println!();

    // ========================================================================
    // Step 3: Inspect the rewritten tree
    // ========================================================================

    println!("━━━ Step 3: The Rewritten Cursor Tree ━━━");
    println!();

    // The store answered the intersection of two scans natively, so the
    // tree collapses to a single posting cursor.
    println!("{}", serde_json::to_string_pretty(&query.describe())?);
    println!();
    query.close();

    // ========================================================================
    // Step 4: Snapshot and restore
    // ========================================================================

    println!("━━━ Step 4: Snapshot and Restore ━━━");
    println!();

    let bytes = store.to_bytes()?;
    println!("  Snapshot: {} bytes", bytes.len());

    let restored = MemStore::from_bytes(&bytes)?;
    println!(
        "  Restored: {} quads, {} node values",
        restored.quad_count(),
        restored.node_count()
    );

    let mut everything = restored.scan_all()?;
    let mut count = 0;
    while everything.advance() {
        count += 1;
    }
    println!("  Full scan over the restored store yields {count} quads");
    println!();

    println!("✅ Walkthrough complete");
    Ok(())
}
