pub mod admin;
pub mod cases;
pub mod commands;
pub mod database;
pub mod discord;
pub mod events;
pub mod expiry;
pub mod extensions;
pub mod models;
pub mod quorum;
pub mod schema;
pub mod settings;
pub mod transport;

#[macro_use]
extern crate diesel;
#[macro_use]
extern crate serde_derive;
#[macro_use]
extern crate tracing;

use std::{env, sync::Arc, time::Duration};

use clokwerk::AsyncScheduler;
use serenity::async_trait;
use serenity::framework::StandardFramework;
use serenity::model::application::interaction::Interaction;
use serenity::model::gateway::{GatewayIntents, Ready};
use serenity::prelude::*;

use crate::admin::AdminService;
use crate::cases::CaseService;
use crate::commands::JURY_GROUP;
use crate::database::Database;
use crate::discord::DiscordTransport;
use crate::expiry::ExpiryQueue;
use crate::settings::ChatSettings;

struct Handler;

#[async_trait]
impl EventHandler for Handler {
    async fn ready(&self, _ctx: Context, ready: Ready) {
        info!("Connected as {} (rev {})", ready.user.name, env!("GIT_HASH"));
    }

    async fn interaction_create(&self, ctx: Context, interaction: Interaction) {
        if let Interaction::MessageComponent(component) = interaction {
            commands::report::handle_ballot_interaction(&ctx, component).await;
        }
    }
}

fn owner_ids_from_env() -> Vec<i64> {
    env::var("OWNER_IDS")
        .unwrap_or_default()
        .split(',')
        .filter_map(|id| id.trim().parse::<i64>().ok())
        .collect()
}

#[tokio::main]
async fn main() {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt::init();

    let token = env::var("DISCORD_TOKEN").expect("Expected a token in the environment");
    let db = Arc::new(Database::new());

    let framework = StandardFramework::new()
        .configure(|c| c.prefix("!"))
        .group(&JURY_GROUP);
    let intents =
        GatewayIntents::GUILDS | GatewayIntents::GUILD_MESSAGES | GatewayIntents::MESSAGE_CONTENT;
    let mut client = Client::builder(&token, intents)
        .event_handler(Handler)
        .framework(framework)
        .await
        .expect("Failed to create the client");

    let transport = Arc::new(DiscordTransport::new(client.cache_and_http.http.clone()));
    let defaults = ChatSettings::default();
    let expiry = Arc::new(ExpiryQueue::new());
    let cases = Arc::new(CaseService::new(
        db.clone(),
        transport.clone(),
        defaults,
        expiry.clone(),
    ));
    let admin = Arc::new(AdminService::new(
        db.clone(),
        transport,
        defaults,
        owner_ids_from_env(),
    ));

    {
        let mut data = client.data.write().await;
        data.insert::<Database>(db);
        data.insert::<CaseService>(cases.clone());
        data.insert::<AdminService>(admin);
    }

    // Close out anything that outlived the previous process and re-arm the
    // rest before taking events, so no case stays open past its deadline.
    match cases.expire_overdue_cases().await {
        Ok(0) => {}
        Ok(n) => info!("startup sweep expired {} overdue case(s)", n),
        Err(e) => error!("startup sweep failed: {:#}", e),
    }
    if let Err(e) = cases.reschedule_pending().await {
        error!("failed to re-arm pending case deadlines: {:#}", e);
    }

    tokio::spawn(expiry.run(cases.clone()));

    let mut scheduler = AsyncScheduler::new();
    events::setup_schedulers(&mut scheduler, cases);
    tokio::spawn(async move {
        loop {
            scheduler.run_pending().await;
            tokio::time::sleep(Duration::from_secs(10)).await;
        }
    });

    let shard_manager = client.shard_manager.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c()
            .await
            .expect("Could not register ctrl+c handler");
        shard_manager.lock().await.shutdown_all().await;
    });

    if let Err(e) = client.start().await {
        error!("Client error: {:?}", e);
    }
}
