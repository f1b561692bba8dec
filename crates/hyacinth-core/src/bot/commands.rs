//! Chat commands. Registration order is match order.

use std::sync::{Arc, Weak};

use crate::{
    dispatcher::CycleState,
    domain::{ChannelId, UserId},
    formatting::{bold, code, escape_html, format_price, truncate_text},
    interaction::{Answers, Interaction, Question},
    messaging::types::{ReactionAction, ReactionEvent},
    plugins::ScraperPlugin,
    reactions::{HandlerFuture, HandlerOutcome},
    router::{CommandInvocation, CommandRouter},
    search::{parse_criteria, LedgerKey, SearchSpec},
    Result,
};

use super::{NotifierBot, SetupPurpose};

pub const DEBUG_COMMAND_PREFIX: &str = r"(d|debug) ";

const SAVED_TITLE_CHARS: usize = 120;

const CONFIRM: &str = "✅";
const REJECT: &str = "❌";

pub(super) fn register(router: &mut CommandRouter<NotifierBot>) -> Result<()> {
    router.register(&format!("{DEBUG_COMMAND_PREFIX}poll"), debug_poll)?;
    router.register(&format!("{DEBUG_COMMAND_PREFIX}reactions"), debug_reactions)?;
    router.register("help", help)?;
    router.register(r"notify\s*$", notify_without_plugin)?;
    router.register(r"notify (?P<plugin>\S+)(?P<params>( \w+=\S+)*)\s*$", notify)?;
    router.register("(searches|show)", show_searches)?;
    router.register(r"remove (?P<index>\d+)", remove_search)?;
    router.register("delete", delete_notifier)?;
    router.register("(pause|stop)", pause)?;
    router.register("(unpause|start)", unpause)?;
    router.register("stats", stats)?;
    router.register("saved", saved)?;
    Ok(())
}

async fn debug_poll(bot: Arc<NotifierBot>, inv: CommandInvocation) -> Result<()> {
    let Some(notifier) = bot.notifier_snapshot(&inv).await? else {
        return Ok(());
    };
    if notifier.paused {
        bot.reply(&inv, "This notifier is paused; polling anyway.").await?;
    }

    let mut unpaused = notifier;
    unpaused.paused = false;
    let reports = bot.dispatcher.run_notifier(&unpaused, &bot.cancel).await;

    let mut lines = vec![format!("Polled {} searches.", reports.len())];
    for (i, r) in reports.iter().enumerate() {
        let status = match r.state {
            CycleState::Failed => format!("failed: {}", escape_html(r.error.as_deref().unwrap_or("unknown error"))),
            _ => format!(
                "fetched {}, new {}, sent {}, send failures {}, malformed {}",
                r.fetched, r.novel, r.sent, r.send_failures, r.skipped_malformed
            ),
        };
        lines.push(format!("{}. {}", i + 1, status));
    }
    bot.reply(&inv, &lines.join("\n")).await?;
    Ok(())
}

async fn debug_reactions(bot: Arc<NotifierBot>, inv: CommandInvocation) -> Result<()> {
    let bound = bot.reactions.len().await;
    let tasks = bot.scheduler.running().await.len();
    bot.reply(
        &inv,
        &format!("{bound} reaction handlers bound, {tasks} poll tasks running."),
    )
    .await?;
    Ok(())
}

async fn help(bot: Arc<NotifierBot>, inv: CommandInvocation) -> Result<()> {
    let plugins = bot
        .plugins
        .loaded()
        .into_iter()
        .map(|(_, name)| code(name))
        .collect::<Vec<_>>()
        .join(", ");
    let c = |s: &str| code(&bot.command_hint(s));
    let text = [
        bold("Hyacinth commands"),
        format!("{} start a guided setup for a new search", c("notify <plugin>")),
        format!("{} add a search directly", c("notify <plugin> key=value ...")),
        format!("{} list this channel's searches", c("show")),
        format!("{} remove a search by number", c("remove <n>")),
        format!("{} / {} stop or resume notifications", c("pause"), c("unpause")),
        format!("{} listings sent per search", c("stats")),
        format!("{} listings you starred with ⭐", c("saved")),
        format!("{} delete this channel's notifier", c("delete")),
        format!("Plugins: {plugins}"),
    ];
    bot.reply(&inv, &text.join("\n")).await?;
    Ok(())
}

async fn notify_without_plugin(bot: Arc<NotifierBot>, inv: CommandInvocation) -> Result<()> {
    let text = format!(
        "Sorry {}, you need to tell me which plugin to use, e.g. {}.",
        inv.mention(),
        code(&bot.command_hint("notify json_feed"))
    );
    bot.reply(&inv, &text).await?;
    Ok(())
}

async fn notify(bot: Arc<NotifierBot>, inv: CommandInvocation) -> Result<()> {
    let name = inv.get("plugin").unwrap_or_default().to_string();
    let Some(plugin_path) = bot.plugins.lookup(&name).map(str::to_string) else {
        let available = bot
            .plugins
            .loaded()
            .into_iter()
            .map(|(_, n)| code(n))
            .collect::<Vec<_>>()
            .join(", ");
        let text = format!(
            "Sorry {}, I don't know a plugin called {}. Available plugins: {available}",
            inv.mention(),
            code(&name)
        );
        bot.reply(&inv, &text).await?;
        return Ok(());
    };
    let plugin = bot.plugins.resolve(&plugin_path)?;

    let params = inv.get("params").unwrap_or_default().trim().to_string();
    if params.is_empty() {
        return start_guided_setup(&bot, &inv, plugin_path, plugin).await;
    }

    let spec = match build_spec(&plugin_path, plugin.as_ref(), &params) {
        Ok(spec) => spec,
        Err(reason) => {
            bot.reply(&inv, &format!("Sorry {}, {}", inv.mention(), escape_html(&reason)))
                .await?;
            return Ok(());
        }
    };
    add_and_confirm(&bot, inv.channel(), inv.author(), &inv.mention(), spec).await
}

async fn start_guided_setup(
    bot: &NotifierBot,
    inv: &CommandInvocation,
    plugin_path: String,
    plugin: Arc<dyn ScraperPlugin>,
) -> Result<()> {
    let validator_path = plugin_path.clone();
    let questions = vec![
        Question::new(
            "criteria",
            format!(
                "{{user}}, what should I search for with {}? Reply with space-separated {} pairs. Say {} to stop.",
                code(plugin.name()),
                code("key=value"),
                code("cancel")
            ),
        )
        .with_validator(move |raw, _| {
            build_spec(&validator_path, plugin.as_ref(), raw.trim()).map(|_| raw.trim().to_string())
        })
        .with_error_response(format!(
            "Sorry {{user}}, I couldn't use that. Reply with {} pairs the plugin understands.",
            code("key=value")
        )),
        Question::new(
            "confirm",
            format!("Start notifying this channel about that search? React {CONFIRM} to confirm or {REJECT} to cancel."),
        )
        .with_reactions(&[CONFIRM, REJECT]),
    ];

    let interaction = Interaction::new(
        inv.channel(),
        inv.author(),
        SetupPurpose::NewSearch { plugin_path },
        questions,
    )?;
    let first = bot.interactions.start(interaction).await;
    let text = crate::interaction::render(&first.prompt, &inv.mention());
    bot.ask(inv.channel(), &text, &first).await
}

/// Called once a guided setup conversation has all its answers.
pub(super) async fn finish_guided_setup(
    bot: &NotifierBot,
    channel: ChannelId,
    user: UserId,
    mention: &str,
    plugin_path: &str,
    answers: &Answers,
) -> Result<()> {
    if answers.get("confirm").map(String::as_str) != Some(CONFIRM) {
        bot.chat
            .send_text(channel, &format!("{}, I won't add that search.", bot.affirm()))
            .await?;
        return Ok(());
    }

    let plugin = bot.plugins.resolve(plugin_path)?;
    let criteria = answers.get("criteria").map(String::as_str).unwrap_or_default();
    match build_spec(plugin_path, plugin.as_ref(), criteria) {
        Ok(spec) => add_and_confirm(bot, channel, user, mention, spec).await,
        Err(reason) => {
            bot.chat
                .send_text(channel, &format!("Sorry {mention}, {}", escape_html(&reason)))
                .await?;
            Ok(())
        }
    }
}

fn build_spec(plugin_path: &str, plugin: &dyn ScraperPlugin, params: &str) -> std::result::Result<SearchSpec, String> {
    let criteria = parse_criteria(params).map_err(|e| e.to_string())?;
    if criteria.is_empty() {
        return Err("a search needs at least one key=value criterion".to_string());
    }
    plugin.validate_criteria(&criteria).map_err(|e| e.to_string())?;
    SearchSpec::new(plugin_path, criteria).map_err(|e| e.to_string())
}

async fn add_and_confirm(
    bot: &NotifierBot,
    channel: ChannelId,
    owner: UserId,
    mention: &str,
    spec: SearchSpec,
) -> Result<()> {
    let description = spec.describe();
    let text = if bot.add_search(channel, owner, spec).await? {
        format!(
            "{} {mention}, I'll let this channel know about new listings for {}.",
            bot.affirm(),
            code(&description)
        )
    } else {
        format!(
            "Sorry {mention}, this channel already has the search {}.",
            code(&description)
        )
    };
    bot.chat.send_text(channel, &text).await?;
    Ok(())
}

async fn show_searches(bot: Arc<NotifierBot>, inv: CommandInvocation) -> Result<()> {
    let Some(notifier) = bot.notifier_snapshot(&inv).await? else {
        return Ok(());
    };
    if notifier.searches.is_empty() {
        bot.reply(&inv, "There are no searches on this channel yet.").await?;
        return Ok(());
    }

    let mut lines = vec![bold(&format!(
        "Searches on this channel{}",
        if notifier.paused { " (paused)" } else { "" }
    ))];
    for (i, spec) in notifier.searches.iter().enumerate() {
        lines.push(format!("{}. {}", i + 1, code(&spec.describe())));
    }
    bot.reply(&inv, &lines.join("\n")).await?;
    Ok(())
}

async fn remove_search(bot: Arc<NotifierBot>, inv: CommandInvocation) -> Result<()> {
    let raw_index = inv.get("index").unwrap_or_default().to_string();
    // Out-of-range numbers fall back to 0, which never names a search.
    let index: usize = raw_index.parse().unwrap_or(0);
    let Some(removed) = bot.update_notifier(&inv, |n| n.remove_search(index)).await? else {
        return Ok(());
    };
    let text = match removed {
        Some(spec) => format!("{}, removed search #{index}: {}", bot.affirm(), code(&spec.describe())),
        None => format!(
            "Sorry {}, there is no search #{}.",
            inv.mention(),
            escape_html(&raw_index)
        ),
    };
    bot.reply(&inv, &text).await?;
    Ok(())
}

async fn delete_notifier(bot: Arc<NotifierBot>, inv: CommandInvocation) -> Result<()> {
    if bot.notifier_snapshot(&inv).await?.is_none() {
        return Ok(());
    }

    let text = format!(
        "{}, are you sure you want to delete the notifier on this channel? React {CONFIRM} to confirm or {REJECT} to cancel.",
        inv.mention()
    );
    let prompt = bot
        .chat
        .send_with_reactions(inv.channel(), &text, &[CONFIRM, REJECT])
        .await?;
    bot.reactions
        .bind(prompt, delete_confirmation(Arc::downgrade(&bot), inv.author()))
        .await
}

/// One-shot handler: the requesting user's ✅ deletes, ❌ cancels.
fn delete_confirmation(
    bot: Weak<NotifierBot>,
    requester: UserId,
) -> impl Fn(ReactionAction, ReactionEvent) -> HandlerFuture + Send + Sync + 'static {
    move |action: ReactionAction, ev: ReactionEvent| -> HandlerFuture {
        let bot = bot.clone();
        Box::pin(async move {
            if action != ReactionAction::Added || ev.user != requester {
                return Ok(HandlerOutcome::Keep);
            }
            let Some(bot) = bot.upgrade() else {
                return Ok(HandlerOutcome::Done);
            };
            let channel = ev.message.channel_id;
            let mention = ev.user.mention(ev.user_name.as_deref());
            match ev.emoji.as_str() {
                CONFIRM => {
                    let text = if bot.remove_notifier(channel).await? {
                        format!("{} {mention}, I deleted the notifier on this channel.", bot.affirm())
                    } else {
                        "There is no notifier on this channel anymore.".to_string()
                    };
                    bot.chat.send_text(channel, &text).await?;
                    Ok(HandlerOutcome::Done)
                }
                REJECT => {
                    bot.chat
                        .send_text(channel, &format!("{}, I won't delete it.", bot.affirm()))
                        .await?;
                    Ok(HandlerOutcome::Done)
                }
                _ => Ok(HandlerOutcome::Keep),
            }
        })
    }
}

async fn pause(bot: Arc<NotifierBot>, inv: CommandInvocation) -> Result<()> {
    set_paused(&bot, &inv, true).await
}

async fn unpause(bot: Arc<NotifierBot>, inv: CommandInvocation) -> Result<()> {
    set_paused(&bot, &inv, false).await
}

async fn set_paused(bot: &NotifierBot, inv: &CommandInvocation, paused: bool) -> Result<()> {
    let Some(changed) = bot
        .update_notifier(inv, |n| std::mem::replace(&mut n.paused, paused) != paused)
        .await?
    else {
        return Ok(());
    };
    let text = match (changed, paused) {
        (true, true) => format!("{}, I paused notifications on this channel.", bot.affirm()),
        (true, false) => format!("{}, notifications on this channel are back on.", bot.affirm()),
        (false, true) => "Notifications on this channel are already paused.".to_string(),
        (false, false) => "Notifications on this channel are not paused.".to_string(),
    };
    bot.reply(inv, &text).await?;
    Ok(())
}

async fn stats(bot: Arc<NotifierBot>, inv: CommandInvocation) -> Result<()> {
    let Some(notifier) = bot.notifier_snapshot(&inv).await? else {
        return Ok(());
    };
    let mut lines = vec![bold("Listings sent per search")];
    let mut total = 0usize;
    for (i, spec) in notifier.searches.iter().enumerate() {
        let count = bot.listings
            .listing_count(&LedgerKey::new(notifier.channel, spec))
            .await?;
        total += count;
        lines.push(format!("{}. {} : {count}", i + 1, code(&spec.describe())));
    }
    lines.push(format!("Total: {total}"));
    bot.reply(&inv, &lines.join("\n")).await?;
    Ok(())
}

async fn saved(bot: Arc<NotifierBot>, inv: CommandInvocation) -> Result<()> {
    let listings = bot.listings.bookmarks(inv.author()).await?;
    if listings.is_empty() {
        bot.reply(
            &inv,
            &format!(
                "{}, you haven't saved any listings yet. React ⭐ on a listing to save it.",
                inv.mention()
            ),
        )
        .await?;
        return Ok(());
    }

    let header = bold(&format!("Saved listings ({})", listings.len()));
    // Newest first; stop before the message outgrows the platform limit,
    // keeping room for the "more" footer.
    let budget = bot.chat.capabilities().max_message_len.saturating_sub(64);
    let mut used = header.chars().count();
    let mut lines = Vec::new();
    for l in listings.iter().rev() {
        let title = escape_html(&truncate_text(&l.title, SAVED_TITLE_CHARS));
        let title = match &l.url {
            Some(url) => format!("<a href=\"{}\">{title}</a>", escape_html(url)),
            None => title,
        };
        let price = l.price.map(|p| format!(" ({})", format_price(p))).unwrap_or_default();
        let line = format!("• {title}{price}");
        let len = line.chars().count() + 1;
        if used + len > budget {
            break;
        }
        used += len;
        lines.push(line);
    }

    let hidden = listings.len() - lines.len();
    let mut text = std::iter::once(header).chain(lines).collect::<Vec<_>>().join("\n");
    if hidden > 0 {
        text.push_str(&format!("\n…and {hidden} older listings not shown."));
    }
    bot.reply(&inv, &text).await?;
    Ok(())
}
