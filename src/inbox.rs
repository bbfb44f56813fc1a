use std::collections::HashMap;

use crate::constants::{
    NOTIFICATION_PAGE_DEFAULT, NOTIFICATION_PAGE_MAX, SHUFFLE_MERGE_WINDOW_MS,
};
use crate::errors::{invalid_input, ApiError};
use crate::game::Delivery;
use crate::types::{Notification, NotificationKind};

#[derive(Clone, Copy, Debug)]
pub struct InboxOptions {
    pub merge_window_ms: u64,
    pub default_page_size: usize,
    pub max_page_size: usize,
}

impl Default for InboxOptions {
    fn default() -> Self {
        Self {
            merge_window_ms: SHUFFLE_MERGE_WINDOW_MS,
            default_page_size: NOTIFICATION_PAGE_DEFAULT,
            max_page_size: NOTIFICATION_PAGE_MAX,
        }
    }
}

#[derive(Clone, Debug)]
pub struct NotificationPage {
    pub notifications: Vec<Notification>,
    pub unread: usize,
    pub end: bool,
}

/// Per-user notification lists, newest first.
pub struct InboxManager {
    options: InboxOptions,
    inboxes: HashMap<String, Vec<Notification>>,
}

impl InboxManager {
    pub fn new(options: InboxOptions, inboxes: HashMap<String, Vec<Notification>>) -> Self {
        Self { options, inboxes }
    }

    pub fn deliver(&mut self, to: &str, notification: Notification) {
        let inbox = self.inboxes.entry(to.to_string()).or_default();

        // Back-to-back shuffles of the same game collapse into one entry while
        // the first one is still unread and recent.
        if let NotificationKind::Shuffle { .. } = notification.kind {
            if let Some(head) = inbox.first_mut() {
                if !head.read
                    && head.game == notification.game
                    && matches!(head.kind, NotificationKind::Shuffle { .. })
                    && notification.time.saturating_sub(head.time) <= self.options.merge_window_ms
                {
                    *head = notification;
                    return;
                }
            }
        }
        inbox.insert(0, notification);
    }

    pub fn deliver_all(&mut self, deliveries: Vec<Delivery>) {
        for delivery in deliveries {
            self.deliver(&delivery.to, delivery.notification);
        }
    }

    /// Returns one page. Spanned entries past the unread run are flagged
    /// read on the way out; the run itself only clears on an explicit read
    /// request. Returned entries keep the flags they had before the call.
    pub fn page(
        &mut self,
        username: &str,
        from: usize,
        limit: Option<usize>,
    ) -> Result<NotificationPage, ApiError> {
        let limit = limit.unwrap_or(self.options.default_page_size);
        if limit == 0 || limit > self.options.max_page_size {
            return Err(invalid_input(format!(
                "limit must be between 1 and {}",
                self.options.max_page_size
            )));
        }

        let Some(inbox) = self.inboxes.get_mut(username) else {
            return Ok(NotificationPage {
                notifications: Vec::new(),
                unread: 0,
                end: true,
            });
        };

        let unread = leading_unread(inbox);
        let upto = from.saturating_add(limit).min(inbox.len());
        let notifications: Vec<Notification> = if from < inbox.len() {
            inbox[from..upto].to_vec()
        } else {
            Vec::new()
        };
        // Entries past the unread run can carry a stale unread flag, for
        // instance out of an older data file. Listing heals them without
        // touching the badge run at the head.
        for entry in inbox.iter_mut().take(upto).skip(from.max(unread)) {
            entry.read = true;
        }

        Ok(NotificationPage {
            notifications,
            unread,
            end: from.saturating_add(limit) >= inbox.len(),
        })
    }

    /// Clears the unread badge, that is the run of unread entries at the head.
    pub fn mark_all_read(&mut self, username: &str) {
        if let Some(inbox) = self.inboxes.get_mut(username) {
            for entry in inbox.iter_mut() {
                if entry.read {
                    break;
                }
                entry.read = true;
            }
        }
    }

    pub fn unread_count(&self, username: &str) -> usize {
        self.inboxes
            .get(username)
            .map(|inbox| leading_unread(inbox))
            .unwrap_or(0)
    }

    pub fn snapshot(&self) -> HashMap<String, Vec<Notification>> {
        self.inboxes.clone()
    }
}

fn leading_unread(inbox: &[Notification]) -> usize {
    inbox.iter().take_while(|entry| !entry.read).count()
}
