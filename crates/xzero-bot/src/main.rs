//! Xzero: chat bot driven through the chat app's web client.

use std::path::PathBuf;
use std::sync::Arc;

use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use xzero_browser::{BrowserConfig, CdpDriver, ChatSurface};
use xzero_chat::{providers, LLMConfig, LlmCompletionClient};
use xzero_core::XzeroConfig;
use xzero_runtime::{Bot, ReplyDispatcher};
use xzero_voice::{OpenAiStt, OpenAiTts, VoiceConfig};

fn resolve_data_dir() -> PathBuf {
    std::env::var("XZERO_DATA_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let exe_dir = std::env::current_exe()
                .ok()
                .and_then(|p| p.parent().map(|p| p.to_path_buf()));
            if let Some(dir) = exe_dir {
                let parent_data = dir.join("../data");
                if parent_data.exists() {
                    return parent_data;
                }
            }
            PathBuf::from("data")
        })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args: Vec<String> = std::env::args().collect();

    if args.len() > 1 {
        match args[1].as_str() {
            "run" => {}
            "--check" | "check" => {
                let ok = check(&resolve_data_dir()).await?;
                std::process::exit(if ok { 0 } else { 1 });
            }
            "init" => return init(&resolve_data_dir()),
            "--help" | "-h" | "help" => {
                println!("Xzero: AI chat bot for WhatsApp Web");
                println!();
                println!("Usage: xzero [command]");
                println!();
                println!("Commands:");
                println!("  (none) | run     Start the bot");
                println!("  init             Write default browser.json and llm-config.json");
                println!("  check            Test the configured LLM provider key");
                println!("  help             Show this help message");
                println!();
                println!("Environment:");
                println!("  XZERO_DATA_DIR             Data directory (default ../data or ./data)");
                println!("  XZERO_CHAT_URL             Chat web app URL");
                println!("  XZERO_CHROME               Chrome/Chromium executable");
                println!("  XZERO_HEADED               Show the browser window (1/true)");
                println!("  XZERO_POLL_INTERVAL_MS     Delay between scans (default 1000)");
                println!("  XZERO_LOGIN_TIMEOUT_SECS   Login wait (default 30)");
                println!("  OPENAI_API_KEY / ANTHROPIC_API_KEY / GROQ_API_KEY");
                return Ok(());
            }
            _ => {
                eprintln!("Unknown command: {}. Use 'xzero help' for usage.", args[1]);
                std::process::exit(1);
            }
        }
    }

    run(&resolve_data_dir()).await
}

async fn run(data_dir: &std::path::Path) -> anyhow::Result<()> {
    info!("Data directory: {}", data_dir.display());
    let config = XzeroConfig::from_env(data_dir)?;
    let paths = &config.data_paths;

    let llm_config = LLMConfig::load(&paths.llm_config_file);
    let (completion, params) = LlmCompletionClient::from_config(&llm_config)?;
    info!(
        "Completion provider: {} (model {})",
        completion.provider(),
        params.model
    );

    // Speech in both directions goes through OpenAI whatever the
    // completion provider is.
    let voice_config = VoiceConfig::with_api_key(llm_config.openai_api_key.clone());
    let stt = OpenAiStt::new(&voice_config)?;
    let tts = OpenAiTts::new(&voice_config)?;

    let dispatcher = ReplyDispatcher::new(
        Arc::new(completion),
        Arc::new(stt),
        Arc::new(tts),
        params,
        &paths.audio,
    );

    let browser_config = BrowserConfig::load(&paths.browser_config_file);
    let driver = CdpDriver::launch(&browser_config, &paths.browser_profile).await?;
    let mut surface = ChatSurface::new(driver, browser_config.selectors.clone(), &paths.audio)
        .with_poll_interval(config.poll_interval);

    if let Err(e) = surface
        .wait_for_login(&browser_config.chat_url, config.login_timeout)
        .await
    {
        error!("Login failed: {}", e);
        if let Err(close_err) = surface.close().await {
            warn!("Failed to close browser: {}", close_err);
        }
        return Err(e.into());
    }

    let mut bot = Bot::new(surface, dispatcher);
    bot.run(async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    })
    .await?;

    Ok(())
}

/// Create editable config files in the data directory.
fn init(data_dir: &std::path::Path) -> anyhow::Result<()> {
    let config = XzeroConfig::from_env(data_dir)?;
    let paths = &config.data_paths;

    for (path, created) in [
        (
            &paths.browser_config_file,
            BrowserConfig::create_if_missing(&paths.browser_config_file)?,
        ),
        (
            &paths.llm_config_file,
            LLMConfig::create_if_missing(&paths.llm_config_file)?,
        ),
    ] {
        if created {
            println!("Wrote {}", path.display());
        } else {
            println!("Kept existing {}", path.display());
        }
    }
    Ok(())
}

/// Print the resolved LLM configuration and test its key.
async fn check(data_dir: &std::path::Path) -> anyhow::Result<bool> {
    let config = XzeroConfig::from_env(data_dir)?;
    let llm_config = LLMConfig::load(&config.data_paths.llm_config_file);
    println!("{}", serde_json::to_string_pretty(&llm_config.summary())?);

    let voice_config = VoiceConfig::with_api_key(llm_config.openai_api_key.clone());
    if voice_config.is_configured() {
        println!("Voice: OpenAI {} / {}", voice_config.stt_model, voice_config.tts_model);
    } else {
        println!("Voice: unavailable (set OPENAI_API_KEY)");
    }

    let Some((provider, model, api_key)) = llm_config.resolve_provider() else {
        eprintln!("No LLM provider configured.");
        return Ok(false);
    };

    match providers::test_api_key(provider, &api_key).await {
        Ok(()) => {
            println!("{} key OK (model {})", provider, model);
            Ok(true)
        }
        Err(e) => {
            eprintln!("{} key rejected: {}", provider, e);
            Ok(false)
        }
    }
}
