// 会话列表来源

use crate::api::{ApiClient, ApiError, Conversation, ProfileType};
use async_trait::async_trait;

/// 按资料获取会话列表
#[async_trait]
pub trait ConversationSource: Send + Sync {
    async fn profile_conversations(
        &self,
        profile_id: &str,
        profile_type: ProfileType,
    ) -> Result<Vec<Conversation>, ApiError>;
}

#[async_trait]
impl ConversationSource for ApiClient {
    async fn profile_conversations(
        &self,
        profile_id: &str,
        profile_type: ProfileType,
    ) -> Result<Vec<Conversation>, ApiError> {
        ApiClient::profile_conversations(self, profile_id, profile_type).await
    }
}

/// 所有会话未读数之和
pub fn total_unread(conversations: &[Conversation]) -> u64 {
    conversations
        .iter()
        .fold(0u64, |acc, c| acc.saturating_add(c.unread_count))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn conversation(unread: u64) -> Conversation {
        Conversation {
            id: None,
            unread_count: unread,
        }
    }

    #[test]
    fn test_total_unread() {
        let list = vec![conversation(3), conversation(0), conversation(4)];
        assert_eq!(total_unread(&list), 7);
        assert_eq!(total_unread(&[]), 0);
    }

    #[test]
    fn test_total_unread_skips_read_conversations() {
        let list = vec![conversation(2), conversation(0), conversation(5)];
        assert_eq!(total_unread(&list), 7);
    }

    proptest! {
        #[test]
        fn prop_total_matches_sum(counts in proptest::collection::vec(0u64..1000, 0..50)) {
            let list: Vec<Conversation> = counts.iter().copied().map(conversation).collect();
            prop_assert_eq!(total_unread(&list), counts.iter().sum::<u64>());
        }
    }
}
