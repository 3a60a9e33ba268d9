//! A console for the things of a registry.

use clap::{Args, Parser, Subcommand};

use ioa::property::PropertyState;

use ioa_controller::agents::{ActionSelector, ThingSelector};
use ioa_controller::generation::{GenerationOptions, LlamaServer};
use ioa_controller::orchestrator::Orchestrator;
use ioa_controller::registry::{ThingHandle, ThingRegistryClient};

use serde_json::Value;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

use tracing::{Level, info};

// The property switched by the lamp console.
const ON_PROPERTY: &str = "on";

#[derive(Debug, thiserror::Error)]
enum Error {
    #[error(transparent)]
    Controller(#[from] ioa_controller::error::Error),
    #[error("console error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Args)]
struct Target {
    /// Position of the thing in the registry.
    #[arg(long)]
    index: Option<usize>,
    /// Identifier of the thing.
    #[arg(long)]
    id: Option<String>,
}

impl Target {
    fn handle(self, default_index: usize) -> ThingHandle {
        match (self.index, self.id) {
            (Some(index), Some(id)) => ThingHandle::index(index).with_id(id),
            (Some(index), None) => ThingHandle::index(index),
            (None, Some(id)) => ThingHandle::id(id),
            (None, None) => ThingHandle::index(default_index),
        }
    }
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Lists the things of the registry.
    Things,
    /// Turns a lamp on and off.
    Lamp(Target),
    /// Shows the state of a thing, then streams its updates.
    Monitor(Target),
    /// Turns a natural-language request into a thing action.
    Ask {
        /// The request.
        request: String,
        /// Address of the completion server.
        #[arg(long, default_value = "http://localhost:8080")]
        llm: String,
        /// Sampling temperature.
        #[arg(long, default_value_t = 0.0)]
        temperature: f32,
        /// Maximum number of generated tokens.
        #[arg(long, default_value_t = 128)]
        max_new_tokens: u32,
        /// Penalty applied to repeated tokens.
        #[arg(long, default_value_t = 1.1)]
        repetition_penalty: f32,
    },
}

#[derive(Debug, Parser)]
#[command(version, about, long_about = None)]
struct Cli {
    /// Address of the registry of things.
    #[arg(short, long, default_value = "http://localhost:8888")]
    registry: String,
    /// Prints debug information.
    #[arg(short, long)]
    verbose: bool,
    #[command(subcommand)]
    command: Command,
}

fn print_state(state: &PropertyState) {
    println!("Current state");
    println!("{}", "=".repeat(8));
    println!("{state}");
    println!();
}

async fn lamp(client: &ThingRegistryClient, handle: ThingHandle) -> Result<(), Error> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();

    loop {
        print_state(&client.get_properties(&handle).await?);

        println!("Turn the lamp [O]n, of[F], or [Q]uit");
        stdout.write_all(b"> ").await?;
        stdout.flush().await?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let on = match line.trim().to_lowercase().as_str() {
            "q" => break,
            "o" => true,
            "f" => false,
            _ => continue,
        };

        let acknowledged = client
            .set_property(&handle, ON_PROPERTY, Value::Bool(on))
            .await?;
        println!("Operation result: {acknowledged}");
        println!("{}", "=".repeat(8));
    }
    Ok(())
}

async fn monitor(client: &ThingRegistryClient, handle: ThingHandle) -> Result<(), Error> {
    print_state(&client.get_properties(&handle).await?);

    let mut subscription = client.subscribe(&handle).await?;
    info!("Press Ctrl-C to stop");

    let token = subscription.cancellation_token();
    let _ctrl_c = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            token.cancel();
        }
    });

    while let Some(state) = subscription.next().await {
        println!("Update received: {state}");
    }
    subscription.close().await;
    Ok(())
}

async fn ask(
    client: ThingRegistryClient,
    llm: String,
    options: GenerationOptions,
    request: &str,
) -> Result<(), Error> {
    let orchestrator = Orchestrator::new(client, LlamaServer::new(llm))
        .thing_selector(ThingSelector::new().options(options))
        .action_selector(ActionSelector::new().options(options));

    let report = orchestrator.run(request).await?;
    println!("{report}");
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_max_level(if cli.verbose { Level::DEBUG } else { Level::INFO })
        .init();

    let client = ThingRegistryClient::new(cli.registry);

    match cli.command {
        Command::Things => println!("{}", client.list_things().await?),
        Command::Lamp(target) => lamp(&client, target.handle(0)).await?,
        Command::Monitor(target) => monitor(&client, target.handle(1)).await?,
        Command::Ask {
            request,
            llm,
            temperature,
            max_new_tokens,
            repetition_penalty,
        } => {
            let options = GenerationOptions::default()
                .temperature(temperature)
                .max_new_tokens(max_new_tokens)
                .repetition_penalty(repetition_penalty);
            ask(client, llm, options, &request).await?;
        }
    }

    Ok(())
}
