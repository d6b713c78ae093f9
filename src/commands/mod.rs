use serenity::framework::standard::macros::group;

pub mod admin;
pub mod report;

use self::admin::{BLACKLIST_COMMAND, CONFIG_COMMAND, SET_COMMAND, STATS_COMMAND};
use self::report::SPAM_COMMAND;

#[group]
#[commands(spam, config, set, stats, blacklist)]
pub struct Jury;
