//! 查询用例：键集分页与请求级批量加载

mod support;

use std::sync::Arc;

use application::{
    memory::Fault, ConversationFields, ErrorKind, MessageFields, PresenceFeed, RegistrySettings,
    UserService, UserServiceDependencies,
};
use domain::{
    ConversationsSortBy, Cursor, FriendsSortBy, MessagesSortBy, PageRequest, SortOrder,
};
use futures::future::join_all;
use support::Harness;

fn user_service(harness: &Harness) -> UserService {
    UserService::new(UserServiceDependencies {
        users: Arc::new(harness.store.clone()),
        user_writer: Arc::new(harness.store.clone()),
        transactor: Arc::new(harness.store.clone()),
        identity: Arc::new(NoIdentity),
        feed_cache: Arc::new(application::NoopFeedCache),
        presence: PresenceFeed::new("presence", RegistrySettings::default()),
        feed_limit: 10,
    })
}

struct NoIdentity;

#[async_trait::async_trait]
impl application::IdentityVerifier for NoIdentity {
    async fn verify_id_token(
        &self,
        _raw_token: &str,
    ) -> Result<domain::AuthToken, application::IdentityError> {
        Err(application::IdentityError::InvalidToken("not configured".into()))
    }
}

#[tokio::test]
async fn messages_page_forward_by_two() {
    let harness = Harness::new();
    let alice = harness.store.seed_user("Alice").await;
    let conversation = harness.store.seed_conversation(alice.id, &[alice.id]).await;
    let mut ids = Vec::new();
    for text in ["one", "two", "three", "four", "five"] {
        ids.push(
            harness
                .store
                .seed_message(conversation.id, alice.id, text)
                .await
                .id,
        );
    }

    let loaders = harness.loaders();
    let first = harness
        .service
        .messages(
            &loaders,
            conversation.id,
            PageRequest::new(2, None, MessagesSortBy::CreatedAt).unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(
        first.nodes().map(|m| m.content.as_str()).collect::<Vec<_>>(),
        vec!["one", "two"]
    );
    assert_eq!(first.total_count, 2);
    assert!(first.page_info.has_next_page);
    assert!(!first.page_info.has_previous_page);
    assert_eq!(first.edges[1].cursor, Cursor::from(ids[1]));

    let loaders = harness.loaders();
    let second = harness
        .service
        .messages(
            &loaders,
            conversation.id,
            PageRequest::new(2, Some(first.edges[1].cursor), MessagesSortBy::CreatedAt).unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(
        second.nodes().map(|m| m.content.as_str()).collect::<Vec<_>>(),
        vec!["three", "four"]
    );
    assert!(second.page_info.has_previous_page);
    assert!(second.page_info.has_next_page);
}

#[tokio::test]
async fn two_page_sizes_for_one_conversation_in_the_same_tick() {
    let harness = Harness::new();
    let alice = harness.store.seed_user("Alice").await;
    let conversation = harness.store.seed_conversation(alice.id, &[alice.id]).await;
    for text in ["one", "two", "three", "four", "five"] {
        harness.store.seed_message(conversation.id, alice.id, text).await;
    }

    let loaders = harness.loaders();
    let (small, large) = futures::join!(
        harness.service.messages(
            &loaders,
            conversation.id,
            PageRequest::new(1, None, MessagesSortBy::CreatedAt).unwrap(),
        ),
        harness.service.messages(
            &loaders,
            conversation.id,
            PageRequest::new(4, None, MessagesSortBy::CreatedAt).unwrap(),
        )
    );

    let small = small.unwrap();
    let large = large.unwrap();
    assert_eq!(
        small.nodes().map(|m| m.content.as_str()).collect::<Vec<_>>(),
        vec!["one"]
    );
    assert!(small.page_info.has_next_page);
    assert_eq!(
        large.nodes().map(|m| m.content.as_str()).collect::<Vec<_>>(),
        vec!["one", "two", "three", "four"]
    );
    assert!(large.page_info.has_next_page);
}

#[tokio::test]
async fn soft_deleted_cursor_message_still_continues_the_walk() {
    let harness = Harness::new();
    let alice = harness.store.seed_user("Alice").await;
    let conversation = harness.store.seed_conversation(alice.id, &[alice.id]).await;
    let mut ids = Vec::new();
    for text in ["one", "two", "three", "four"] {
        ids.push(harness.store.seed_message(conversation.id, alice.id, text).await.id);
    }

    let loaders = harness.loaders();
    let first = harness
        .service
        .messages(
            &loaders,
            conversation.id,
            PageRequest::new(2, None, MessagesSortBy::CreatedAt).unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(first.page_info.end_cursor, Some(Cursor::from(ids[1])));

    harness.store.soft_delete_message(ids[1]).await;

    let loaders = harness.loaders();
    let second = harness
        .service
        .messages(
            &loaders,
            conversation.id,
            PageRequest::new(2, first.page_info.end_cursor, MessagesSortBy::CreatedAt).unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(
        second.nodes().map(|m| m.content.as_str()).collect::<Vec<_>>(),
        vec!["three", "four"]
    );
    assert!(second.page_info.has_previous_page);
    assert!(!second.page_info.has_next_page);
}

#[tokio::test]
async fn sort_order_is_carried_but_pages_stay_ascending() {
    let harness = Harness::new();
    let alice = harness.store.seed_user("Alice").await;
    let conversation = harness.store.seed_conversation(alice.id, &[alice.id]).await;
    harness.store.seed_message(conversation.id, alice.id, "first").await;
    harness.store.seed_message(conversation.id, alice.id, "second").await;

    let page = PageRequest::<MessagesSortBy>::parse(
        10,
        0,
        "MESSAGES_SORT_BY_CREATED_AT",
        Some("SORT_ORDER_DES"),
    )
    .unwrap();
    assert_eq!(page.sort_order, SortOrder::Desc);

    let loaders = harness.loaders();
    let connection = harness
        .service
        .messages(&loaders, conversation.id, page)
        .await
        .unwrap();
    assert_eq!(
        connection.nodes().map(|m| m.content.as_str()).collect::<Vec<_>>(),
        vec!["first", "second"]
    );
}

#[tokio::test]
async fn sibling_field_resolutions_share_one_fetch() {
    let harness = Harness::new();
    let alice = harness.store.seed_user("Alice").await;
    let bob = harness.store.seed_user("Bob").await;
    let carol = harness.store.seed_user("Carol").await;
    let conversation = harness
        .store
        .seed_conversation(alice.id, &[alice.id, bob.id, carol.id])
        .await;

    let mut messages = Vec::new();
    for (sender, text) in [(&alice, "a"), (&bob, "b"), (&carol, "c"), (&alice, "d")] {
        messages.push(
            harness
                .store
                .seed_message(conversation.id, sender.id, text)
                .await,
        );
    }

    let loaders = harness.loaders();
    let senders = join_all(
        messages
            .iter()
            .map(|message| async { MessageFields::new(&loaders, message).sender().await }),
    )
    .await;

    assert_eq!(harness.store.read_count("users.find_by_ids"), 1);
    let names: Vec<String> = senders
        .into_iter()
        .map(|sender| sender.unwrap().unwrap().name)
        .collect();
    assert_eq!(names, vec!["Alice", "Bob", "Carol", "Alice"]);
}

#[tokio::test]
async fn conversation_fields_resolve_through_loaders() {
    let harness = Harness::new();
    let alice = harness.store.seed_user("Alice").await;
    let bob = harness.store.seed_user("Bob").await;
    let first = harness
        .store
        .seed_conversation(alice.id, &[alice.id, bob.id])
        .await;
    let second = harness.store.seed_conversation(bob.id, &[bob.id]).await;
    harness.store.seed_message(first.id, bob.id, "hey").await;

    let loaders = harness.loaders();
    let first_fields = ConversationFields::new(&loaders, &first);
    let second_fields = ConversationFields::new(&loaders, &second);

    let (first_members, second_members) =
        futures::join!(first_fields.participants(), second_fields.participants());
    assert_eq!(harness.store.read_count("conversations.participants_in"), 1);
    assert_eq!(first_members.unwrap().len(), 2);
    assert_eq!(second_members.unwrap().len(), 1);

    let creator = first_fields.creator().await.unwrap().unwrap();
    assert_eq!(creator.id, alice.id);

    let all = first_fields.all_messages().await.unwrap();
    assert_eq!(all.len(), 1);
    assert!(second_fields.all_messages().await.unwrap().is_empty());

    let page = first_fields
        .messages(PageRequest::new(10, None, MessagesSortBy::CreatedAt).unwrap())
        .await
        .unwrap();
    let message = page.into_nodes().remove(0);
    let owner = MessageFields::new(&loaders, &message)
        .conversation()
        .await
        .unwrap()
        .unwrap();
    assert_eq!(owner.id, first.id);
}

#[tokio::test]
async fn failed_batch_fails_every_pending_load() {
    let harness = Harness::new();
    let alice = harness.store.seed_user("Alice").await;
    let conversation = harness.store.seed_conversation(alice.id, &[alice.id]).await;
    let messages = vec![
        harness.store.seed_message(conversation.id, alice.id, "x").await,
        harness.store.seed_message(conversation.id, alice.id, "y").await,
    ];
    harness.store.inject(Fault::Reads);

    let loaders = harness.loaders();
    let results = join_all(
        messages
            .iter()
            .map(|message| async { MessageFields::new(&loaders, message).sender().await }),
    )
    .await;

    for result in results {
        let err = result.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Internal);
        assert!(err.to_string().contains("users"));
    }
}

#[tokio::test]
async fn missing_key_resolves_to_none() {
    let harness = Harness::new();
    let loaders = harness.loaders();

    let user = loaders.user(domain::UserId::new(12345)).await.unwrap();
    assert!(user.is_none());
}

#[tokio::test]
async fn friends_are_users_sharing_a_conversation() {
    let harness = Harness::new();
    let me = harness.store.seed_user("Me").await;
    let zed = harness.store.seed_user("Zed").await;
    let amy = harness.store.seed_user("Amy").await;
    let kim = harness.store.seed_user("Kim").await;
    let stranger = harness.store.seed_user("Stranger").await;

    harness
        .store
        .seed_conversation(me.id, &[me.id, zed.id, amy.id])
        .await;
    harness.store.seed_conversation(me.id, &[me.id, kim.id, amy.id]).await;
    harness.store.seed_conversation(stranger.id, &[stranger.id, zed.id]).await;

    let service = user_service(&harness);
    let loaders = harness.loaders();
    let first = service
        .friends(
            &loaders,
            me.id,
            PageRequest::new(2, None, FriendsSortBy::Name).unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(
        first.nodes().map(|u| u.name.as_str()).collect::<Vec<_>>(),
        vec!["Amy", "Kim"]
    );
    assert!(first.page_info.has_next_page);

    let loaders = harness.loaders();
    let rest = service
        .friends(
            &loaders,
            me.id,
            PageRequest::new(2, first.page_info.end_cursor, FriendsSortBy::Name).unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(
        rest.nodes().map(|u| u.name.as_str()).collect::<Vec<_>>(),
        vec!["Zed"]
    );
    assert!(!rest.page_info.has_next_page);
    assert!(rest.page_info.has_previous_page);
}

#[tokio::test]
async fn conversations_of_user_are_paged_by_update_time() {
    let harness = Harness::new();
    let me = harness.store.seed_user("Me").await;
    let other = harness.store.seed_user("Other").await;
    let a = harness.store.seed_conversation(me.id, &[me.id]).await;
    let b = harness.store.seed_conversation(other.id, &[other.id, me.id]).await;
    harness.store.seed_conversation(other.id, &[other.id]).await;

    let loaders = harness.loaders();
    let connection = harness
        .service
        .conversations(
            &loaders,
            me.id,
            PageRequest::new(10, None, ConversationsSortBy::UpdatedAt).unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(
        connection.nodes().map(|c| c.id).collect::<Vec<_>>(),
        vec![a.id, b.id]
    );
    assert_eq!(harness.store.read_count("conversations.find_by_ids"), 1);
}
