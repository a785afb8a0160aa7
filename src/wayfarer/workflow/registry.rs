// SPDX-License-Identifier: MIT

use crate::wdk::node::NodeExecutor;
use crate::wdk::tool::Tool;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Something that can be looked up by name in a [`Registry`]
pub trait Registered: Send + Sync {
    fn registered_name(&self) -> &str;
}

impl Registered for dyn Tool {
    fn registered_name(&self) -> &str {
        self.name()
    }
}

impl Registered for dyn NodeExecutor {
    fn registered_name(&self) -> &str {
        self.name()
    }
}

/// Shared name → implementation map
pub struct Registry<T: ?Sized> {
    items: Arc<RwLock<HashMap<String, Arc<T>>>>,
}

/// Tools available to tool nodes
pub type ToolRegistry = Registry<dyn Tool>;

/// Executors that YAML graph definitions can refer to by name
pub type NodeRegistry = Registry<dyn NodeExecutor>;

impl<T: ?Sized + Registered> Registry<T> {
    pub fn new() -> Self {
        Self {
            items: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub async fn register(&self, item: Arc<T>) {
        let mut items = self.items.write().await;
        items.insert(item.registered_name().to_string(), item);
    }

    pub async fn get(&self, name: &str) -> Option<Arc<T>> {
        let items = self.items.read().await;
        items.get(name).cloned()
    }

    /// Registered names, sorted
    pub async fn names(&self) -> Vec<String> {
        let items = self.items.read().await;
        let mut names: Vec<String> = items.keys().cloned().collect();
        names.sort();
        names
    }
}

impl<T: ?Sized> Clone for Registry<T> {
    fn clone(&self) -> Self {
        Self {
            items: Arc::clone(&self.items),
        }
    }
}

impl<T: ?Sized + Registered> Default for Registry<T> {
    fn default() -> Self {
        Self::new()
    }
}
