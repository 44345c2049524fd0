//! 投递账本：按 (消息, 接收者) 记录是否已送达、是否已读

use std::sync::Arc;

use domain::{
    ChatId, DeliveryStatus, DeliveryStatusId, DeliveryStatusPatch, DomainError, MessageId, UserId,
};
use tracing::{debug, instrument};

use crate::clock::Clock;
use crate::dispatcher::{DispatchExt, RealtimeDispatcher, RealtimeEvent};
use crate::dto::{MessageView, UnseenCount};
use crate::error::ApplicationError;
use crate::repository::{ChatMemberRepository, DeliveryStatusRepository, MessageRepository};
use crate::views::assemble_message;

pub struct DeliveryLedgerDependencies {
    pub statuses: Arc<dyn DeliveryStatusRepository>,
    pub messages: Arc<dyn MessageRepository>,
    pub members: Arc<dyn ChatMemberRepository>,
    pub dispatcher: Arc<dyn RealtimeDispatcher>,
    pub clock: Arc<dyn Clock>,
}

/// `mark_received` 的结果：最新的消息快照，以及这次调用是否真的改动了记录
#[derive(Debug, Clone)]
pub struct ReceiptOutcome {
    pub message: MessageView,
    pub changed: bool,
}

#[derive(Clone)]
pub struct DeliveryLedger {
    deps: Arc<DeliveryLedgerDependencies>,
}

impl DeliveryLedger {
    pub fn new(deps: DeliveryLedgerDependencies) -> Self {
        Self {
            deps: Arc::new(deps),
        }
    }

    /// 为每个接收者确保存在一条未触达的记录，已存在的保持不变
    pub async fn ensure_tracked(
        &self,
        message_id: MessageId,
        recipients: &[UserId],
    ) -> Result<Vec<DeliveryStatus>, ApplicationError> {
        let mut rows = Vec::with_capacity(recipients.len());
        for user_id in recipients {
            rows.push(self.deps.statuses.ensure(message_id, *user_id).await?);
        }
        Ok(rows)
    }

    /// 记录送达时间，只在首次生效
    ///
    /// 没有对应记录时返回 `None`，不会补建。
    #[instrument(skip(self), fields(user_id = %user_id, message_id = %message_id))]
    pub async fn mark_received(
        &self,
        user_id: UserId,
        message_id: MessageId,
    ) -> Result<Option<ReceiptOutcome>, ApplicationError> {
        if self.deps.statuses.find(message_id, user_id).await?.is_none() {
            debug!("receipt for untracked message ignored");
            return Ok(None);
        }

        let changed = self
            .deps
            .statuses
            .mark_received(message_id, user_id, self.deps.clock.now())
            .await?;
        let message = self.view(message_id).await?;
        Ok(Some(ReceiptOutcome { message, changed }))
    }

    /// 同时写入送达与已读时间，记录不存在时插入
    #[instrument(skip(self), fields(user_id = %user_id, message_id = %message_id))]
    pub async fn mark_seen(
        &self,
        user_id: UserId,
        message_id: MessageId,
    ) -> Result<MessageView, ApplicationError> {
        if self.deps.messages.find_by_id(message_id).await?.is_none() {
            return Err(DomainError::MessageNotFound.into());
        }
        self.deps
            .statuses
            .mark_seen(message_id, user_id, self.deps.clock.now())
            .await?;
        self.view(message_id).await
    }

    /// 其他每个在会话中的成员发给 viewer、已送达但未读的消息数
    pub async fn count_unseen_by_sender(
        &self,
        chat_id: ChatId,
        viewer: UserId,
    ) -> Result<Vec<UnseenCount>, ApplicationError> {
        let senders: Vec<UserId> = self
            .deps
            .members
            .list_members(chat_id)
            .await?
            .into_iter()
            .filter(|member| member.is_active() && member.user_id != viewer)
            .map(|member| member.user_id)
            .collect();
        if senders.is_empty() {
            return Ok(Vec::new());
        }
        Ok(self
            .deps
            .statuses
            .count_unseen_by_sender(chat_id, viewer, &senders)
            .await?)
    }

    /// 按主键局部更新一条记录，然后通知会话中除 `actor` 外的成员
    #[instrument(skip(self, patch), fields(status_id = %status_id, actor = %actor))]
    pub async fn update_status(
        &self,
        status_id: DeliveryStatusId,
        patch: DeliveryStatusPatch,
        actor: UserId,
    ) -> Result<MessageView, ApplicationError> {
        if patch.is_empty() {
            return Err(DomainError::invalid_argument(
                "status",
                "either receivedAt or seenAt is required",
            )
            .into());
        }

        let status = self
            .deps
            .statuses
            .update(status_id, &patch)
            .await?
            .ok_or(DomainError::DeliveryStatusNotFound)?;
        let message = self.view(status.message_id).await?;

        let members: Vec<UserId> = self
            .deps
            .members
            .list_members(message.message.chat_id)
            .await?
            .into_iter()
            .filter(|member| member.is_active())
            .map(|member| member.user_id)
            .collect();
        let event = if patch.seen_at.is_some() {
            RealtimeEvent::MessageSeen(message.clone())
        } else {
            RealtimeEvent::MessageReceived(message.clone())
        };
        self.deps
            .dispatcher
            .emit_to_others(&members, actor, event)
            .await;

        Ok(message)
    }

    pub async fn view(&self, message_id: MessageId) -> Result<MessageView, ApplicationError> {
        assemble_message(
            self.deps.messages.as_ref(),
            self.deps.statuses.as_ref(),
            message_id,
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatcher::MockRealtimeDispatcher;
    use crate::memory::{InMemoryStore, RecordingDispatcher};
    use crate::repository::ChatRepository;
    use chrono::{Duration, Utc};
    use domain::{Chat, ChatKind, ChatMember, Message, MessageType};

    struct Fixture {
        store: Arc<InMemoryStore>,
        dispatcher: Arc<RecordingDispatcher>,
        ledger: DeliveryLedger,
        chat_id: ChatId,
        users: Vec<UserId>,
    }

    async fn fixture() -> Fixture {
        let store = Arc::new(InMemoryStore::new());
        let dispatcher = Arc::new(RecordingDispatcher::new());
        let mut users = Vec::new();
        for name in ["alice", "bob", "carol"] {
            users.push(store.add_user(name).await.id);
        }

        let chat_id = ChatId::generate();
        let now = Utc::now();
        ChatRepository::create(
            store.as_ref(),
            Chat::new(chat_id, ChatKind::Group, now),
            ChatMember::roster(chat_id, users[0], &users, now),
            None,
        )
        .await
        .unwrap();

        let ledger = DeliveryLedger::new(DeliveryLedgerDependencies {
            statuses: store.clone(),
            messages: store.clone(),
            members: store.clone(),
            dispatcher: dispatcher.clone(),
            clock: Arc::new(crate::clock::SystemClock),
        });
        Fixture {
            store,
            dispatcher,
            ledger,
            chat_id,
            users,
        }
    }

    async fn send(fixture: &Fixture, sender: UserId) -> MessageId {
        let message = Message::new(
            MessageId::generate(),
            fixture.chat_id,
            sender,
            Some("hi".into()),
            None,
            MessageType::Text,
            Utc::now(),
        )
        .unwrap();
        MessageRepository::create(fixture.store.as_ref(), message)
            .await
            .unwrap()
            .id
    }

    #[tokio::test]
    async fn ensure_tracked_is_idempotent() {
        let fx = fixture().await;
        let message_id = send(&fx, fx.users[0]).await;

        let first = fx.ledger.ensure_tracked(message_id, &fx.users[1..]).await.unwrap();
        let second = fx.ledger.ensure_tracked(message_id, &fx.users[1..]).await.unwrap();

        assert_eq!(first, second);
        let view = fx.ledger.view(message_id).await.unwrap();
        assert_eq!(view.statuses.len(), 2);
    }

    #[tokio::test]
    async fn repeated_receipt_keeps_first_timestamp() {
        let fx = fixture().await;
        let bob = fx.users[1];
        let message_id = send(&fx, fx.users[0]).await;
        fx.ledger.ensure_tracked(message_id, &[bob]).await.unwrap();

        let first = fx.ledger.mark_received(bob, message_id).await.unwrap().unwrap();
        let second = fx.ledger.mark_received(bob, message_id).await.unwrap().unwrap();

        assert!(first.changed);
        assert!(!second.changed);
        let received = first.message.status_for(bob).unwrap().received_at;
        assert!(received.is_some());
        assert_eq!(second.message.status_for(bob).unwrap().received_at, received);
        assert_eq!(second.message.statuses.iter().filter(|s| s.user_id == bob).count(), 1);
    }

    #[tokio::test]
    async fn receipt_for_untracked_pair_is_a_no_op() {
        let fx = fixture().await;
        let message_id = send(&fx, fx.users[0]).await;

        let outcome = fx.ledger.mark_received(fx.users[2], message_id).await.unwrap();

        assert!(outcome.is_none());
        assert!(fx.ledger.view(message_id).await.unwrap().statuses.is_empty());
    }

    #[tokio::test]
    async fn seen_without_prior_receipt_stamps_both() {
        let fx = fixture().await;
        let carol = fx.users[2];
        let message_id = send(&fx, fx.users[0]).await;

        let view = fx.ledger.mark_seen(carol, message_id).await.unwrap();

        let status = view.status_for(carol).unwrap();
        assert!(status.received_at.is_some());
        assert!(status.seen_at.is_some());
    }

    #[tokio::test]
    async fn unseen_counts_group_by_sender_and_skip_zero() {
        let fx = fixture().await;
        let (alice, bob, carol) = (fx.users[0], fx.users[1], fx.users[2]);

        for sender in [alice, alice, carol] {
            let message_id = send(&fx, sender).await;
            fx.ledger.ensure_tracked(message_id, &[bob]).await.unwrap();
            fx.ledger.mark_received(bob, message_id).await.unwrap();
        }
        let seen = send(&fx, carol).await;
        fx.ledger.ensure_tracked(seen, &[bob]).await.unwrap();
        fx.ledger.mark_seen(bob, seen).await.unwrap();
        // 未送达的不计入
        let pending = send(&fx, alice).await;
        fx.ledger.ensure_tracked(pending, &[bob]).await.unwrap();

        let mut counts = fx.ledger.count_unseen_by_sender(fx.chat_id, bob).await.unwrap();
        counts.sort_by_key(|c| c.count);

        assert_eq!(
            counts,
            vec![
                UnseenCount { sender_id: carol, count: 1 },
                UnseenCount { sender_id: alice, count: 2 },
            ]
        );
    }

    #[tokio::test]
    async fn update_status_notifies_everyone_but_the_actor() {
        let fx = fixture().await;
        let (alice, bob) = (fx.users[0], fx.users[1]);
        let message_id = send(&fx, alice).await;
        let rows = fx.ledger.ensure_tracked(message_id, &[bob]).await.unwrap();

        let at = Utc::now() - Duration::minutes(1);
        let view = fx
            .ledger
            .update_status(
                rows[0].id,
                DeliveryStatusPatch {
                    received_at: None,
                    seen_at: Some(at),
                },
                bob,
            )
            .await
            .unwrap();

        let status = view.status_for(bob).unwrap();
        assert_eq!(status.seen_at, Some(at));
        assert_eq!(status.received_at, Some(at));

        let events = fx.dispatcher.events().await;
        let recipients: Vec<UserId> = events.iter().map(|(user, _)| *user).collect();
        assert_eq!(recipients.len(), 2);
        assert!(!recipients.contains(&bob));
        assert!(events
            .iter()
            .all(|(_, event)| event.name() == "messageSeen"));
    }

    #[tokio::test]
    async fn update_status_for_unknown_row_is_not_found() {
        let store = Arc::new(InMemoryStore::new());
        let mut dispatcher = MockRealtimeDispatcher::new();
        dispatcher.expect_emit_to_user().never();

        let ledger = DeliveryLedger::new(DeliveryLedgerDependencies {
            statuses: store.clone(),
            messages: store.clone(),
            members: store.clone(),
            dispatcher: Arc::new(dispatcher),
            clock: Arc::new(crate::clock::SystemClock),
        });

        let err = ledger
            .update_status(
                DeliveryStatusId::generate(),
                DeliveryStatusPatch {
                    received_at: Some(Utc::now()),
                    seen_at: None,
                },
                UserId::generate(),
            )
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ApplicationError::Domain(DomainError::DeliveryStatusNotFound)
        ));
    }
}
