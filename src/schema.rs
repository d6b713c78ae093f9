table! {
    cases (id) {
        id -> Integer,
        guild_id -> BigInt,
        channel_id -> BigInt,
        message_id -> BigInt,
        offender_id -> BigInt,
        reporter_id -> BigInt,
        status -> Text,
        opened_at -> Timestamp,
        closes_at -> Timestamp,
        ballot_channel_id -> Nullable<BigInt>,
        ballot_message_id -> Nullable<BigInt>,
        settings_snapshot -> Text,
        participant_target -> Integer,
    }
}

table! {
    votes (case_id, voter_id) {
        case_id -> Integer,
        voter_id -> BigInt,
        decision -> Text,
        updated_at -> Timestamp,
    }
}

table! {
    chats (guild_id) {
        guild_id -> BigInt,
        title -> Text,
        settings -> Text,
        updated_at -> Timestamp,
    }
}

table! {
    blacklist (guild_id, user_id) {
        guild_id -> BigInt,
        user_id -> BigInt,
        reason -> Nullable<Text>,
        added_at -> Timestamp,
    }
}

allow_tables_to_appear_in_same_query!(cases, votes, chats, blacklist);
