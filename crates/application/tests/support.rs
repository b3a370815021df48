#![allow(dead_code)]

use std::sync::Arc;

use application::{
    memory::MemoryStore, LoaderSettings, MessageFeed, MessageService, MessageServiceDependencies,
    RegistrySettings, RequestLoaders,
};

pub struct Harness {
    pub store: MemoryStore,
    pub feed: MessageFeed,
    pub service: MessageService,
}

impl Harness {
    pub fn new() -> Self {
        let store = MemoryStore::new();
        let feed = MessageFeed::new("messages", RegistrySettings::default());
        let service = MessageService::new(MessageServiceDependencies {
            conversation_writer: Arc::new(store.clone()),
            message_writer: Arc::new(store.clone()),
            transactor: Arc::new(store.clone()),
            feed: feed.clone(),
        });

        Self {
            store,
            feed,
            service,
        }
    }

    pub fn loaders(&self) -> RequestLoaders {
        RequestLoaders::new(&self.store.loader_sources(), LoaderSettings::default())
    }
}
