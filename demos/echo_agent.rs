//! An echo agent and a caller in one process, wired through the in-memory platform.
//!
//! This example demonstrates:
//! - Registering a function with a documented signature
//! - Starting an agent and letting it provide a node
//! - Reserving that node and calling it through a postman
//!
//! Run with `cargo run --example echo_agent`.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use taskport::mock::TransportEvent;
use taskport::prelude::*;
use taskport::{AssignationMessage, DefinitionError, LogLevel, ProvisionMessage};

// ============================================================================
// Step 1: What the agent offers
// ============================================================================

fn app() -> Result<App, DefinitionError> {
    let mut app = App::new(StructureRegistry::new());
    app.register_function(
        &FunctionSignature::new("echo")
            .param("text", TypeDescriptor::String)
            .returns(TypeDescriptor::String)
            .doc("Echo\n\nReturns its input unchanged.\n\nArgs:\n    text (str): What to echo\n"),
        &DefinitionOptions::new().with_package("demo"),
        |context: AssignationContext, args: Vec<Value>| async move {
            context.log(LogLevel::Info, "echoing").await?;
            Ok(args)
        },
    )?;
    Ok(app)
}

// ============================================================================
// Step 2: Stand-in for the platform's routing
// ============================================================================

/// Forwards new assignations to the agent and the agent's updates back to
/// the platform, which is what the real platform does between the two.
async fn bridge(platform: Arc<MockPlatform>, transport: Arc<MockAgentTransport>, provision: String) {
    let mut forwarded = HashSet::new();
    let mut relayed = 0;
    loop {
        for assignation in platform.assignations() {
            if assignation.status == AssignationStatus::Assigned
                && forwarded.insert(assignation.id.clone())
            {
                let message = AssignationMessage::new(assignation.id.as_str(), provision.as_str())
                    .with_args(assignation.args.clone());
                if transport.deliver(message).is_err() {
                    return;
                }
            }
        }

        let updates = transport.assignation_updates();
        for update in &updates[relayed..] {
            platform.update_assignation(&update.assignation, update.status, update.returns.clone());
        }
        relayed = updates.len();

        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

// ============================================================================
// Step 3: Run both sides
// ============================================================================

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let platform = Arc::new(MockPlatform::new());
    let transport = Arc::new(MockAgentTransport::new().with_instance_id("echo-agent"));

    let app = app()?;
    let structures = app.structures().clone();
    let postman = app.postman(platform.clone());
    let mut agent = app.into_agent(platform.clone(), transport.clone());
    agent.connect().await?;
    agent.start().await?;

    let template = agent
        .core()
        .templates()
        .next()
        .cloned()
        .ok_or("no template was registered")?;
    println!("Registered {} as template {}", template.node.interface, template.id);

    let provision = platform.add_provision(&template.id);
    transport.deliver(ProvisionMessage {
        provision: provision.id.clone(),
        template: Some(template.id.clone()),
    })?;
    let agent_task = tokio::spawn(async move { agent.run_loop().await });
    let bridge_task = tokio::spawn(bridge(
        platform.clone(),
        transport.clone(),
        provision.id.clone(),
    ));

    let mut reservations = postman
        .reserve(&template.node.id, ReserveParams::default(), None)
        .await?;
    let reservation = reservations
        .recv()
        .await
        .ok_or("reservation queue closed")?;
    println!("Reservation {} is {:?}", reservation.id, reservation.status);

    let definition = template.node.definition();
    for text in ["hello", "taskport"] {
        let echoed = postman
            .call(
                &reservation.id,
                &definition,
                vec![Value::from(text)],
                HashMap::new(),
                &structures,
            )
            .await?;
        println!("  {text} -> {:?}", echoed[0]);
    }

    println!("\nAgent logs:");
    for event in transport.events() {
        if let TransportEvent::AssignationLog {
            assignation,
            message,
            ..
        } = event
        {
            println!("  [{assignation}] {message}");
        }
    }

    bridge_task.abort();
    agent_task.abort();
    postman.stop_watching().await;
    println!("\n=== Echo completed successfully! ===");
    Ok(())
}
