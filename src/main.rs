use atomflow::storage::SqliteStorage;
use atomflow::task::example_task::{ByeTask, HiTask};
use atomflow::{Atom, Engine, Flow, FlowError, StorageBackend};
use std::sync::Arc;

fn hi_bye(blowup: bool) -> Flow {
    Flow::linear("hi-bye")
        .add(Atom::task("hi", HiTask))
        .add(Atom::task("bye", ByeTask { blowup }))
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    env_logger::init();
    println!("Starting the atomflow demo...");

    // Step 1: Set up the storage backend.
    let storage = Arc::new(SqliteStorage::new("sqlite:atomflow.db?mode=rwc").await?);
    let flow_id = format!("hi-bye-{}", uuid::Uuid::new_v4());

    // Step 2: The first run blows up, so 'hi' gets reverted.
    let mut engine = Engine::new(hi_bye(true), storage.clone(), &flow_id);
    match engine.run().await {
        Err(FlowError::Execution(failures)) => {
            println!("First run reverted:");
            for failure in failures.iter() {
                println!("  {}", failure);
            }
        }
        other => println!("First run ended unexpectedly: {:?}", other),
    }

    // Step 3: Run the same flow again, this time without the blowup.
    let mut engine = Engine::new(hi_bye(false), storage.clone(), &flow_id);
    let state = engine.run().await?;
    println!("Second run finished: {}", state);

    // Step 4: Query what was persisted.
    println!("Atom details:");
    for detail in storage.load_atoms(&flow_id).await? {
        println!(
            "  Atom {}: {} (intention {}, progress {:.1})",
            detail.name, detail.state, detail.intention, detail.progress
        );
    }

    Ok(())
}
