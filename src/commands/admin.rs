use serenity::framework::standard::{macros::command, Args, CommandResult};
use serenity::model::prelude::*;
use serenity::prelude::*;

use crate::admin::AdminError;
use crate::extensions::ClientContextExt;

async fn is_guild_admin(ctx: &Context, msg: &Message, guild_id: GuildId) -> CommandResult<bool> {
    let admin = ctx.get_admin_service().await;
    if admin
        .ensure_admin(msg.author.id.0 as i64, guild_id.0 as i64)
        .await
    {
        return Ok(true);
    }
    msg.reply(ctx, "You are not an administrator of this server.")
        .await?;
    Ok(false)
}

/// Show the effective jury settings for this server.
#[command]
#[only_in(guilds)]
async fn config(ctx: &Context, msg: &Message) -> CommandResult {
    let guild_id = match msg.guild_id {
        Some(guild_id) => guild_id,
        None => return Ok(()),
    };
    if !is_guild_admin(ctx, msg, guild_id).await? {
        return Ok(());
    }
    let db = ctx.get_db().await;
    db.upsert_chat(
        guild_id.0 as i64,
        &guild_id.name(&ctx.cache).unwrap_or_default(),
    )
    .await?;
    let admin = ctx.get_admin_service().await;
    let summary = admin.show_settings(guild_id.0 as i64).await?;
    msg.reply(ctx, summary).await?;
    Ok(())
}

/// Override one jury setting for this server: `set <field> <value>`.
#[command]
#[only_in(guilds)]
async fn set(ctx: &Context, msg: &Message, mut args: Args) -> CommandResult {
    let guild_id = match msg.guild_id {
        Some(guild_id) => guild_id,
        None => return Ok(()),
    };
    if !is_guild_admin(ctx, msg, guild_id).await? {
        return Ok(());
    }
    let field = match args.single::<String>() {
        Ok(field) => field,
        Err(_) => {
            msg.reply(ctx, "Usage: set <field> <value>").await?;
            return Ok(());
        }
    };
    let value = args.rest().to_string();
    if value.is_empty() {
        msg.reply(ctx, "Usage: set <field> <value>").await?;
        return Ok(());
    }

    let admin = ctx.get_admin_service().await;
    match admin
        .update_setting(guild_id.0 as i64, &field, &value)
        .await
    {
        Ok(confirmation) => {
            msg.reply(ctx, confirmation).await?;
        }
        Err(AdminError::Internal(e)) => {
            error!("failed to update a setting: {:#}", e);
            msg.reply(ctx, "Could not store the setting, try again later.")
                .await?;
        }
        Err(rejection) => {
            msg.reply(ctx, rejection.to_string()).await?;
        }
    }
    Ok(())
}

/// Summarize the most recent cases in this server.
#[command]
#[only_in(guilds)]
async fn stats(ctx: &Context, msg: &Message) -> CommandResult {
    let guild_id = match msg.guild_id {
        Some(guild_id) => guild_id,
        None => return Ok(()),
    };
    if !is_guild_admin(ctx, msg, guild_id).await? {
        return Ok(());
    }
    let admin = ctx.get_admin_service().await;
    let summary = admin.stats(guild_id.0 as i64).await?;
    msg.reply(ctx, summary).await?;
    Ok(())
}

/// Manage the server blacklist: `blacklist <add|remove> <user_id> [reason]`.
#[command]
#[only_in(guilds)]
async fn blacklist(ctx: &Context, msg: &Message, mut args: Args) -> CommandResult {
    let guild_id = match msg.guild_id {
        Some(guild_id) => guild_id,
        None => return Ok(()),
    };
    if !is_guild_admin(ctx, msg, guild_id).await? {
        return Ok(());
    }
    let (action, user_id) = match (args.single::<String>(), args.single::<i64>()) {
        (Ok(action), Ok(user_id)) => (action, user_id),
        _ => {
            msg.reply(ctx, "Usage: blacklist <add|remove> <user_id> [reason]")
                .await?;
            return Ok(());
        }
    };
    let entry_reason = match args.rest() {
        "" => None,
        rest => Some(rest.to_string()),
    };

    let admin = ctx.get_admin_service().await;
    match admin
        .blacklist_action(
            guild_id.0 as i64,
            user_id,
            &action,
            entry_reason.as_deref(),
        )
        .await
    {
        Ok(confirmation) => {
            msg.reply(ctx, confirmation).await?;
        }
        Err(AdminError::Internal(e)) => {
            error!("failed to update the blacklist: {:#}", e);
            msg.reply(ctx, "Could not update the blacklist, try again later.")
                .await?;
        }
        Err(rejection) => {
            msg.reply(ctx, rejection.to_string()).await?;
        }
    }
    Ok(())
}
