use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::api::PostResponse;

/// Events pushed to every live connection of a room.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum RoomEvent {
    /// A post or reply was created
    NewPost(PostResponse),

    /// A post's aggregate score changed
    NewVote { post_id: Uuid, new_score: i64 },

    /// A live connection was opened in the room
    ParticipantJoined {
        anonymous_id: String,
        participant_count: usize,
    },

    /// A live connection was closed
    ParticipantLeft {
        anonymous_id: String,
        participant_count: usize,
    },

    /// The room was retired; the server closes the connection after this
    RoomExpired { room_id: Uuid },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_format() {
        let post_id = Uuid::new_v4();
        let json = serde_json::to_value(RoomEvent::NewVote { post_id, new_score: -1 }).unwrap();
        assert_eq!(json["type"], "new_vote");
        assert_eq!(json["data"]["new_score"], -1);
        assert_eq!(json["data"]["post_id"], post_id.to_string());

        let joined = serde_json::to_value(RoomEvent::ParticipantJoined {
            anonymous_id: "Calm Owl".into(),
            participant_count: 3,
        })
        .unwrap();
        assert_eq!(joined["type"], "participant_joined");
        assert_eq!(joined["data"]["participant_count"], 3);
    }
}
