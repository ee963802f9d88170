use anyhow::{anyhow, bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use nestory_frontend::lifecycle::{
    ControllerSettings, JobController, JobSnapshot, Phase, ProxyClient,
};
use nestory_frontend::models::job::DEFAULT_STEPS;
use service_core::observability::init_tracing;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

/// Talk to a running nestory-frontend.
#[derive(Debug, Parser)]
#[command(name = "nestory", version, about = "Nestory image and story client")]
struct Cli {
    /// Base URL of the nestory-frontend server
    #[arg(long, env = "NESTORY_URL", default_value = "http://localhost:3000")]
    server: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Generate an image and save it as PNG
    Image(ImageArgs),
    /// List story topics
    Topics,
    /// Render a story for a child
    Story(StoryArgs),
}

#[derive(Debug, Args)]
struct ImageArgs {
    /// What to draw
    prompt: String,

    #[arg(long, default_value_t = DEFAULT_STEPS)]
    steps: i64,

    /// Where to write the PNG
    #[arg(long, short, default_value = "nestory.png")]
    out: PathBuf,
}

#[derive(Debug, Args)]
struct StoryArgs {
    /// The child's name
    #[arg(long)]
    child: String,

    /// Topic key, see `nestory topics`
    #[arg(long)]
    topic: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing("nestory", "error", None);

    let client = ProxyClient::new(&cli.server).context("failed to build HTTP client")?;

    match cli.command {
        Command::Image(args) => generate_image(client, args).await,
        Command::Topics => {
            for topic in client.topics().await? {
                println!("{}\t{}", topic.key, topic.title);
            }
            Ok(())
        }
        Command::Story(args) => {
            let story = client.story(&args.child, &args.topic).await?;
            println!("{}\n\n{}", story.topic_title, story.story);
            Ok(())
        }
    }
}

async fn generate_image(client: ProxyClient, args: ImageArgs) -> Result<()> {
    let controller = JobController::new(Arc::new(client), ControllerSettings::default());
    let mut updates = controller.subscribe();

    let generator = controller.clone();
    let prompt = args.prompt.clone();
    let steps = args.steps;
    tokio::spawn(async move {
        if let Err(e) = generator.generate(&prompt, steps).await {
            tracing::error!(error = %e, "Generate rejected");
        }
    });

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                controller.reset();
                eprintln!();
                bail!("cancelled");
            }
            changed = updates.changed() => {
                changed.map_err(|_| anyhow!("controller stopped"))?;
            }
        }

        let snapshot = updates.borrow_and_update().clone();
        render(&snapshot);

        match snapshot.phase {
            Phase::Done => break,
            Phase::Error => {
                eprintln!();
                bail!(snapshot.error.unwrap_or_else(|| "generation failed".to_string()));
            }
            _ => {}
        }
    }
    eprintln!();

    let image = controller
        .image()
        .ok_or_else(|| anyhow!("job finished without an image"))?;
    std::fs::write(&args.out, &image)
        .with_context(|| format!("failed to write {}", args.out.display()))?;
    println!("{}", args.out.display());

    Ok(())
}

fn render(snapshot: &JobSnapshot) {
    let job = snapshot.job_id.as_deref().unwrap_or("-");
    eprint!(
        "\r{:<20} {:>3}%  job {}",
        snapshot.phase.label(),
        snapshot.progress.round() as u32,
        job
    );
    let _ = std::io::stderr().flush();
}
