pub const DEFAULT_BADGE_CEILING: u32 = 99;

/// Global unread count as shown in the navigation badge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnreadBadge {
    count: u32,
    ceiling: u32,
}

impl Default for UnreadBadge {
    fn default() -> Self {
        Self::new(0)
    }
}

impl UnreadBadge {
    pub fn new(count: u32) -> Self {
        Self {
            count,
            ceiling: DEFAULT_BADGE_CEILING,
        }
    }

    pub fn with_ceiling(mut self, ceiling: u32) -> Self {
        self.ceiling = ceiling;
        self
    }

    /// The uncapped count.
    pub fn count(&self) -> u32 {
        self.count
    }

    /// Returns the badge text, or None when nothing is unread.
    pub fn label(&self) -> Option<String> {
        match self.count {
            0 => None,
            count if count > self.ceiling => Some(format!("{}+", self.ceiling)),
            count => Some(count.to_string()),
        }
    }
}
