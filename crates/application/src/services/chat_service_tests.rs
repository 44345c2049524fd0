//! 会话编排单元测试
//!
//! 使用内存存储与记录型分发器，覆盖建会话、发消息、投递状态流转等流程。

use std::sync::Arc;

use domain::{ChatKind, DeliveryStatusPatch, DomainError, MessageType, Pagination, UserId};

use super::*;
use crate::clock::SystemClock;
use crate::memory::{InMemoryStore, RecordingDispatcher};

struct Harness {
    store: Arc<InMemoryStore>,
    dispatcher: Arc<RecordingDispatcher>,
    service: ChatService,
}

fn harness() -> Harness {
    let store = Arc::new(InMemoryStore::new());
    let dispatcher = Arc::new(RecordingDispatcher::new());
    let service = ChatService::new(ChatServiceDependencies {
        chats: store.clone(),
        members: store.clone(),
        messages: store.clone(),
        statuses: store.clone(),
        blocks: store.clone(),
        users: store.clone(),
        dispatcher: dispatcher.clone(),
        clock: Arc::new(SystemClock),
    });
    Harness {
        store,
        dispatcher,
        service,
    }
}

async fn users(h: &Harness, names: &[&str]) -> Vec<UserId> {
    let mut ids = Vec::new();
    for name in names {
        ids.push(h.store.add_user(*name).await.id);
    }
    ids
}

fn private(a: UserId, b: UserId) -> CreateChatRequest {
    CreateChatRequest {
        kind: ChatKind::Private,
        member_ids: vec![a, b],
        creator_id: a,
        group: None,
    }
}

fn group(creator: UserId, members: &[UserId], name: &str) -> CreateChatRequest {
    CreateChatRequest {
        kind: ChatKind::Group,
        member_ids: members.to_vec(),
        creator_id: creator,
        group: Some(GroupMeta {
            name: name.to_string(),
            icon_url: None,
            description: None,
        }),
    }
}

fn text(chat_id: ChatId, sender_id: UserId, body: &str) -> SendMessageRequest {
    SendMessageRequest {
        chat_id,
        sender_id,
        text: Some(body.to_string()),
        file_url: None,
        message_type: MessageType::Text,
    }
}

#[tokio::test]
async fn test_private_chat_is_reused_for_the_same_pair() {
    let h = harness();
    let ids = users(&h, &["alice", "bob"]).await;

    let first = h.service.create_chat(private(ids[0], ids[1])).await.unwrap();
    // 由对方发起，顺序相反
    let second = h.service.create_chat(private(ids[1], ids[0])).await.unwrap();

    assert_eq!(first.chat.id, second.chat.id);
    assert_eq!(h.store.chat_count().await, 1);
    // 只有首次创建推送 newChat
    let events = h.dispatcher.events().await;
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].0, ids[1]);
    assert_eq!(events[0].1.name(), "newChat");
}

#[tokio::test]
async fn test_private_chat_requires_two_distinct_members() {
    let h = harness();
    let ids = users(&h, &["alice", "bob", "carol"]).await;

    let mut request = private(ids[0], ids[1]);
    request.member_ids.push(ids[2]);
    let err = h.service.create_chat(request).await.unwrap_err();
    assert!(matches!(
        err,
        ApplicationError::Domain(DomainError::InvalidArgument { .. })
    ));

    let alone = private(ids[0], ids[0]);
    assert!(h.service.create_chat(alone).await.is_err());
}

#[tokio::test]
async fn test_create_group_chat_notifies_everyone_but_creator() {
    let h = harness();
    let ids = users(&h, &["alice", "bob", "carol"]).await;

    let view = h
        .service
        .create_chat(group(ids[0], &[ids[1], ids[2], ids[1]], "hiring"))
        .await
        .unwrap();

    assert_eq!(view.members.len(), 3);
    assert_eq!(view.members[0].user_id, ids[0]);
    assert_eq!(view.members[0].role, domain::MemberRole::Admin);
    assert_eq!(view.group.as_ref().map(|g| g.name.as_str()), Some("hiring"));

    let recipients: Vec<UserId> = h.dispatcher.events().await.into_iter().map(|(u, _)| u).collect();
    assert_eq!(recipients, vec![ids[1], ids[2]]);
}

#[tokio::test]
async fn test_group_chat_without_metadata_is_rejected() {
    let h = harness();
    let ids = users(&h, &["alice", "bob"]).await;

    let mut request = group(ids[0], &[ids[1]], "x");
    request.group = None;
    assert!(h.service.create_chat(request).await.is_err());
}

#[tokio::test]
async fn test_create_chat_with_unknown_user_fails() {
    let h = harness();
    let ids = users(&h, &["alice"]).await;

    let err = h
        .service
        .create_chat(private(ids[0], UserId::generate()))
        .await
        .unwrap_err();
    assert!(matches!(err, ApplicationError::Domain(DomainError::UserNotFound)));
}

#[tokio::test]
async fn test_send_message_tracks_every_other_member() {
    let h = harness();
    let ids = users(&h, &["alice", "bob", "carol"]).await;
    let chat = h
        .service
        .create_chat(group(ids[0], &[ids[1], ids[2]], "team"))
        .await
        .unwrap();
    h.dispatcher.clear().await;

    let view = h
        .service
        .send_message(text(chat.chat.id, ids[0], "hello"))
        .await
        .unwrap();

    assert_eq!(view.statuses.len(), 2);
    assert!(view.status_for(ids[0]).is_none());
    assert!(view.status_for(ids[1]).is_some());
    assert!(view.status_for(ids[2]).is_some());

    let events = h.dispatcher.events().await;
    assert_eq!(events.len(), 2);
    for (user_id, event) in events {
        assert_ne!(user_id, ids[0]);
        match event {
            RealtimeEvent::NewMessage(pushed) => assert_eq!(pushed.statuses.len(), 2),
            other => panic!("unexpected event {}", other.name()),
        }
    }
}

#[tokio::test]
async fn test_non_member_cannot_send() {
    let h = harness();
    let ids = users(&h, &["alice", "bob", "mallory"]).await;
    let chat = h.service.create_chat(private(ids[0], ids[1])).await.unwrap();

    let err = h
        .service
        .send_message(text(chat.chat.id, ids[2], "let me in"))
        .await
        .unwrap_err();
    assert!(matches!(err, ApplicationError::Domain(DomainError::NotChatMember)));
}

#[tokio::test]
async fn test_private_chat_delivery_lifecycle() {
    let h = harness();
    let ids = users(&h, &["alice", "bob"]).await;
    let (alice, bob) = (ids[0], ids[1]);

    let chat = h.service.create_chat(private(alice, bob)).await.unwrap();
    let sent = h
        .service
        .send_message(text(chat.chat.id, alice, "hi"))
        .await
        .unwrap();

    assert_eq!(sent.statuses.len(), 1);
    let status = sent.status_for(bob).unwrap();
    assert!(status.received_at.is_none());
    assert!(status.seen_at.is_none());

    let received = h
        .service
        .mark_received(bob, sent.message.id)
        .await
        .unwrap()
        .unwrap();
    let status = received.status_for(bob).unwrap();
    assert!(status.received_at.is_some());
    assert!(status.seen_at.is_none());

    let unseen = h.service.count_unseen(chat.chat.id, bob).await.unwrap();
    assert_eq!(unseen, vec![UnseenCount { sender_id: alice, count: 1 }]);

    let seen = h.service.mark_seen(bob, sent.message.id).await.unwrap();
    let status = seen.status_for(bob).unwrap();
    assert!(status.received_at.is_some());
    assert!(status.seen_at.is_some());

    assert!(h.service.count_unseen(chat.chat.id, bob).await.unwrap().is_empty());

    // alice 依次收到 newMessage 以外的回执推送
    let names: Vec<&str> = h
        .dispatcher
        .events_for(alice)
        .await
        .iter()
        .map(|event| event.name())
        .collect();
    assert_eq!(names, vec!["messageReceived", "messageSeen"]);
}

#[tokio::test]
async fn test_repeated_receipt_is_not_rebroadcast() {
    let h = harness();
    let ids = users(&h, &["alice", "bob"]).await;
    let chat = h.service.create_chat(private(ids[0], ids[1])).await.unwrap();
    let sent = h
        .service
        .send_message(text(chat.chat.id, ids[0], "ping"))
        .await
        .unwrap();

    let first = h.service.mark_received(ids[1], sent.message.id).await.unwrap().unwrap();
    let second = h.service.mark_received(ids[1], sent.message.id).await.unwrap().unwrap();

    assert_eq!(
        first.status_for(ids[1]).unwrap().received_at,
        second.status_for(ids[1]).unwrap().received_at
    );
    assert_eq!(second.statuses.len(), 1);
    assert_eq!(h.dispatcher.events_for(ids[0]).await.len(), 1);
}

#[tokio::test]
async fn test_receipt_from_sender_is_ignored() {
    let h = harness();
    let ids = users(&h, &["alice", "bob"]).await;
    let chat = h.service.create_chat(private(ids[0], ids[1])).await.unwrap();
    let sent = h
        .service
        .send_message(text(chat.chat.id, ids[0], "ping"))
        .await
        .unwrap();

    // 发送者没有投递记录
    let outcome = h.service.mark_received(ids[0], sent.message.id).await.unwrap();
    assert!(outcome.is_none());
}

#[tokio::test]
async fn test_concurrent_private_chat_creation_is_tolerated() {
    let h = harness();
    let ids = users(&h, &["alice", "bob"]).await;

    let (first, second) = tokio::join!(
        h.service.create_chat(private(ids[0], ids[1])),
        h.service.create_chat(private(ids[0], ids[1])),
    );
    let (first, second) = (first.unwrap(), second.unwrap());

    for view in [&first, &second] {
        assert_eq!(view.chat.kind, ChatKind::Private);
        let mut members = view.member_ids();
        members.sort();
        let mut expected = ids.clone();
        expected.sort();
        assert_eq!(members, expected);
    }
    let count = h.store.chat_count().await;
    assert!(count == 1 || count == 2, "unexpected chat count {count}");
}

#[tokio::test]
async fn test_only_sender_can_edit_and_edit_is_pushed() {
    let h = harness();
    let ids = users(&h, &["alice", "bob"]).await;
    let chat = h.service.create_chat(private(ids[0], ids[1])).await.unwrap();
    let sent = h
        .service
        .send_message(text(chat.chat.id, ids[0], "typo"))
        .await
        .unwrap();
    h.dispatcher.clear().await;

    let edit = |actor_id| UpdateMessageRequest {
        message_id: sent.message.id,
        actor_id,
        text: Some("fixed".to_string()),
        file_url: None,
        status: None,
    };

    let err = h.service.update_message(edit(ids[1])).await.unwrap_err();
    assert!(matches!(err, ApplicationError::Domain(DomainError::NotMessageOwner)));

    let updated = h.service.update_message(edit(ids[0])).await.unwrap();
    assert_eq!(updated.message.text.as_deref(), Some("fixed"));
    assert_eq!(updated.message.sender_id, ids[0]);

    let events = h.dispatcher.events().await;
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].0, ids[1]);
    assert_eq!(events[0].1.name(), "updateMessage");
}

#[tokio::test]
async fn test_delete_message_is_silent_and_cascades() {
    let h = harness();
    let ids = users(&h, &["alice", "bob"]).await;
    let chat = h.service.create_chat(private(ids[0], ids[1])).await.unwrap();
    let sent = h
        .service
        .send_message(text(chat.chat.id, ids[0], "oops"))
        .await
        .unwrap();
    h.service
        .add_reaction(AddReactionRequest {
            message_id: sent.message.id,
            user_id: ids[1],
            emoji: "😮".to_string(),
        })
        .await
        .unwrap();
    h.dispatcher.clear().await;

    assert!(h.service.delete_message(sent.message.id, ids[1]).await.is_err());
    h.service.delete_message(sent.message.id, ids[0]).await.unwrap();

    assert!(h.dispatcher.events().await.is_empty());
    let history = h
        .service
        .get_messages(chat.chat.id, ids[0], Pagination::default())
        .await
        .unwrap();
    assert!(history.is_empty());
}

#[tokio::test]
async fn test_reactions_and_replies() {
    let h = harness();
    let ids = users(&h, &["alice", "bob"]).await;
    let chat = h.service.create_chat(private(ids[0], ids[1])).await.unwrap();
    let first = h
        .service
        .send_message(text(chat.chat.id, ids[0], "one"))
        .await
        .unwrap();
    let second = h
        .service
        .send_message(text(chat.chat.id, ids[0], "two"))
        .await
        .unwrap();
    h.dispatcher.clear().await;

    // 同一用户可以多次表态
    for emoji in ["👍", "🎉"] {
        h.service
            .add_reaction(AddReactionRequest {
                message_id: first.message.id,
                user_id: ids[1],
                emoji: emoji.to_string(),
            })
            .await
            .unwrap();
    }

    let reply = h
        .service
        .add_reply(AddReplyRequest {
            message_id: first.message.id,
            user_id: ids[1],
            text: Some("agreed".to_string()),
            reply_to_id: None,
        })
        .await
        .unwrap();
    let nested = h
        .service
        .add_reply(AddReplyRequest {
            message_id: first.message.id,
            user_id: ids[0],
            text: Some("thanks".to_string()),
            reply_to_id: Some(reply.id),
        })
        .await
        .unwrap();
    assert_eq!(nested.reply_to_id, Some(reply.id));

    // 指向其他消息下的回复
    let err = h
        .service
        .add_reply(AddReplyRequest {
            message_id: second.message.id,
            user_id: ids[0],
            text: None,
            reply_to_id: Some(reply.id),
        })
        .await
        .unwrap_err();
    assert!(matches!(err, ApplicationError::Domain(DomainError::ReplyNotFound)));

    let history = h
        .service
        .get_messages(chat.chat.id, ids[1], Pagination::default())
        .await
        .unwrap();
    assert_eq!(history[0].message.id, second.message.id);
    assert_eq!(history[1].reactions.len(), 2);
    assert_eq!(history[1].replies.len(), 2);

    let reaction_id = history[1].reactions[0].id;
    h.service
        .remove_reaction(first.message.id, reaction_id, ids[1])
        .await
        .unwrap();
    let err = h
        .service
        .remove_reaction(first.message.id, reaction_id, ids[1])
        .await
        .unwrap_err();
    assert!(matches!(err, ApplicationError::Domain(DomainError::ReactionNotFound)));

    h.service
        .remove_reply(first.message.id, nested.id, ids[0])
        .await
        .unwrap();
    assert!(h.dispatcher.events().await.is_empty());
}

#[tokio::test]
async fn test_leave_and_rejoin_flip_the_same_member_row() {
    let h = harness();
    let ids = users(&h, &["alice", "bob", "carol"]).await;
    let chat = h
        .service
        .create_chat(group(ids[0], &[ids[1], ids[2]], "crew"))
        .await
        .unwrap();
    let chat_id = chat.chat.id;

    let left = h.service.user_left(chat_id, ids[2]).await.unwrap();
    assert!(left.left_at.is_some());

    let err = h
        .service
        .send_message(text(chat_id, ids[2], "still here?"))
        .await
        .unwrap_err();
    assert!(matches!(err, ApplicationError::Domain(DomainError::NotChatMember)));

    // 离开的成员不再收到投递记录
    let sent = h.service.send_message(text(chat_id, ids[0], "hi")).await.unwrap();
    assert_eq!(sent.statuses.len(), 1);

    let page = h.service.get_chats(ids[2], ChatQuery::default()).await.unwrap();
    assert_eq!(page.total, 0);

    let rejoined = h.service.user_joined(chat_id, ids[2]).await.unwrap();
    assert!(rejoined.is_active());
    let page = h.service.get_chats(ids[2], ChatQuery::default()).await.unwrap();
    assert_eq!(page.total, 1);

    let members = h.store.list_members(chat_id).await.unwrap();
    assert_eq!(members.len(), 3);
}

#[tokio::test]
async fn test_get_chats_enriches_and_filters() {
    let h = harness();
    let ids = users(&h, &["alice", "bob", "carol"]).await;
    let (alice, bob, carol) = (ids[0], ids[1], ids[2]);

    let with_bob = h.service.create_chat(private(alice, bob)).await.unwrap();
    let team = h
        .service
        .create_chat(group(carol, &[alice], "Design Team"))
        .await
        .unwrap();

    for body in ["1", "2", "3"] {
        let sent = h
            .service
            .send_message(text(with_bob.chat.id, bob, body))
            .await
            .unwrap();
        h.service.mark_received(alice, sent.message.id).await.unwrap();
    }
    h.service
        .send_message(text(team.chat.id, carol, "kickoff"))
        .await
        .unwrap();

    let page = h.service.get_chats(alice, ChatQuery::default()).await.unwrap();
    assert_eq!(page.total, 2);
    // 最近活跃的在前
    assert_eq!(page.items[0].chat.id, team.chat.id);
    assert_eq!(page.items[0].group.as_ref().unwrap().name, "Design Team");

    let private_item = &page.items[1];
    assert_eq!(private_item.last_messages.len(), 2);
    assert_eq!(private_item.last_messages[0].text.as_deref(), Some("3"));
    assert_eq!(
        private_item.unseen,
        vec![UnseenCount { sender_id: bob, count: 3 }]
    );
    assert_eq!(page.users.len(), 3);

    let by_name = h
        .service
        .get_chats(
            alice,
            ChatQuery {
                search: Some("BO".to_string()),
                page: Pagination::default(),
            },
        )
        .await
        .unwrap();
    assert_eq!(by_name.total, 1);
    assert_eq!(by_name.items[0].chat.id, with_bob.chat.id);

    let by_group = h
        .service
        .get_chats(
            alice,
            ChatQuery {
                search: Some("design".to_string()),
                page: Pagination::default(),
            },
        )
        .await
        .unwrap();
    assert_eq!(by_group.items.len(), 1);
    assert_eq!(by_group.items[0].chat.id, team.chat.id);
}

#[tokio::test]
async fn test_blocks_are_recorded_but_not_enforced() {
    let h = harness();
    let ids = users(&h, &["alice", "bob"]).await;
    let chat = h.service.create_chat(private(ids[0], ids[1])).await.unwrap();

    let block = h
        .service
        .block_user(BlockUserRequest {
            chat_id: chat.chat.id,
            blocked_by: ids[0],
            blocked_to: ids[1],
        })
        .await
        .unwrap();
    assert_eq!(h.service.list_blocks(chat.chat.id, ids[0]).await.unwrap(), vec![block.clone()]);

    h.service
        .send_message(text(chat.chat.id, ids[1], "can you hear me"))
        .await
        .unwrap();

    h.service
        .unblock_user(chat.chat.id, block.id, ids[0])
        .await
        .unwrap();
    let err = h
        .service
        .unblock_user(chat.chat.id, block.id, ids[0])
        .await
        .unwrap_err();
    assert!(matches!(err, ApplicationError::Domain(DomainError::ChatBlockNotFound)));
}

#[tokio::test]
async fn test_update_status_is_limited_to_the_row_owner() {
    let h = harness();
    let ids = users(&h, &["alice", "bob"]).await;
    let chat = h.service.create_chat(private(ids[0], ids[1])).await.unwrap();
    let sent = h
        .service
        .send_message(text(chat.chat.id, ids[0], "hey"))
        .await
        .unwrap();
    let status_id = sent.status_for(ids[1]).unwrap().id;
    let patch = DeliveryStatusPatch {
        received_at: Some(chrono::Utc::now()),
        seen_at: None,
    };

    let err = h
        .service
        .update_status(status_id, patch.clone(), ids[0])
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        ApplicationError::Domain(DomainError::DeliveryStatusNotFound)
    ));

    h.dispatcher.clear().await;
    let view = h.service.update_status(status_id, patch, ids[1]).await.unwrap();
    assert!(view.status_for(ids[1]).unwrap().is_unseen());
    let events = h.dispatcher.events().await;
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].0, ids[0]);
    assert_eq!(events[0].1.name(), "messageReceived");
}
