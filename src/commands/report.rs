use serenity::framework::standard::{macros::command, CommandResult};
use serenity::model::application::interaction::message_component::MessageComponentInteraction;
use serenity::model::application::interaction::InteractionResponseType;
use serenity::model::prelude::*;
use serenity::prelude::*;

use crate::cases::{Report, ReportError, VoteAction, VoteError};
use crate::extensions::ClientContextExt;
use crate::models::VoteDecision;

/// Report the replied-to message as spam and open a jury vote on it.
#[command]
#[only_in(guilds)]
async fn spam(ctx: &Context, msg: &Message) -> CommandResult {
    let guild_id = match msg.guild_id {
        Some(guild_id) => guild_id,
        None => return Ok(()),
    };
    let flagged = match msg.referenced_message.as_deref() {
        Some(flagged) => flagged,
        None => {
            msg.reply(ctx, ReportError::NotAReply.to_string()).await?;
            return Ok(());
        }
    };
    if flagged.webhook_id.is_some() {
        msg.reply(ctx, ReportError::UnknownOffender.to_string())
            .await?;
        return Ok(());
    }

    let report = Report {
        guild_id: guild_id.0 as i64,
        guild_title: guild_id.name(&ctx.cache).unwrap_or_default(),
        channel_id: msg.channel_id.0 as i64,
        message_id: flagged.id.0 as i64,
        offender_id: flagged.author.id.0 as i64,
        reporter_id: msg.author.id.0 as i64,
    };

    let cases = ctx.get_case_service().await;
    match cases.create_case(report).await {
        Ok(case) => {
            msg.reply(
                ctx,
                format!("Case #{} opened, the jury may now vote.", case.id),
            )
            .await?;
        }
        Err(ReportError::Internal(e)) => {
            error!("failed to open a case: {:#}", e);
            msg.reply(ctx, "Could not open the case, try again later.")
                .await?;
        }
        Err(rejection) => {
            msg.reply(ctx, rejection.to_string()).await?;
        }
    }
    Ok(())
}

/// Route a ballot button press into the case engine and acknowledge the
/// interaction. Rejections come back as an ephemeral note to the voter.
pub async fn handle_ballot_interaction(ctx: &Context, component: MessageComponentInteraction) {
    let custom_id = component.data.custom_id.as_str();
    let Some(rest) = custom_id.strip_prefix("jury_") else {
        return;
    };
    let Some((verb, case_id)) = rest.split_once('_') else {
        return;
    };
    let case_id: i32 = match case_id.parse() {
        Ok(case_id) => case_id,
        Err(_) => return,
    };
    let action = match verb {
        "spam" => VoteAction::Cast(VoteDecision::Spam),
        "not" => VoteAction::Cast(VoteDecision::NotSpam),
        "retract" => VoteAction::Retract,
        _ => return,
    };

    let cases = ctx.get_case_service().await;
    let voter_id = component.user.id.0 as i64;
    let feedback = match cases.apply_vote(case_id, voter_id, action).await {
        Ok(()) => None,
        Err(VoteError::Internal(e)) => {
            error!("vote on case #{} failed: {:#}", case_id, e);
            Some("Could not record the vote, try again later.".to_string())
        }
        Err(rejection) => Some(rejection.to_string()),
    };

    let response = component
        .create_interaction_response(&ctx.http, |r| match feedback {
            Some(text) => r
                .kind(InteractionResponseType::ChannelMessageWithSource)
                .interaction_response_data(|d| d.ephemeral(true).content(text)),
            None => r.kind(InteractionResponseType::DeferredUpdateMessage),
        })
        .await;
    if let Err(e) = response {
        warn!("failed to acknowledge a ballot interaction: {:#}", e);
    }
}
