use crate::broadcast::Target;
use crate::error::{GameError, GameResult};
use crate::guild::GuildManager;
use crate::party::PartyManager;
use crate::world::World;
use shared::{ChatChannel, ErrorCode, ParticipantId, MAX_CHAT_LEN};

/// Trims a chat line and checks its length.
pub fn sanitize(message: &str) -> GameResult<String> {
    let trimmed = message.trim();
    let length = trimmed.chars().count();
    if length == 0 || length > MAX_CHAT_LEN {
        return Err(GameError::protocol(
            ErrorCode::InvalidPayload,
            format!("chat messages must be 1-{} characters", MAX_CHAT_LEN),
        ));
    }
    Ok(trimmed.to_string())
}

/// Works out who hears a message on `channel`.
pub fn recipients(
    sender: ParticipantId,
    channel: ChatChannel,
    target: Option<ParticipantId>,
    world: &World,
    parties: &PartyManager,
    guilds: &GuildManager,
) -> GameResult<Target> {
    match channel {
        ChatChannel::Global => Ok(Target::All),
        ChatChannel::Party => parties
            .party_of(sender)
            .map(|party| Target::Many(party.members.clone()))
            .ok_or_else(|| GameError::invalid_state("not in a party")),
        ChatChannel::Guild => {
            let name = &world.require(sender)?.name;
            let guild = guilds
                .guild_of(name)
                .ok_or_else(|| GameError::invalid_state("not in a guild"))?;
            let ids = guild
                .online_members()
                .filter_map(|member| world.find_by_name(&member.name))
                .collect();
            Ok(Target::Many(ids))
        }
        ChatChannel::Whisper => {
            let target = target
                .filter(|id| world.contains(*id))
                .ok_or_else(|| GameError::unknown_target("whisper target is not online"))?;
            if target == sender {
                Ok(Target::One(sender))
            } else {
                Ok(Target::Many(vec![sender, target]))
            }
        }
    }
}
