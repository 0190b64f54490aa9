use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};

/// What a key press asks the browser to do
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Quit,
    Help,
    NextPage,
    PrevPage,
    FirstPage,
    LastPage,
    GotoPage,
    Search,
    NextTag,
    PrevTag,
    NextAuthor,
    PrevAuthor,
    ClearFilters,
    LargerPages,
    SmallerPages,
    Refresh,
    Prefetch,
    ToggleTheme,
}

/// Key binding configuration
#[derive(Debug, Clone)]
pub struct KeyBinding {
    pub keys: Vec<(KeyCode, KeyModifiers)>,
    pub label: &'static str,
    pub description: &'static str,
    pub action: Action,
}

impl KeyBinding {
    pub fn new(key: KeyCode, label: &'static str, description: &'static str, action: Action) -> Self {
        Self {
            keys: vec![(key, KeyModifiers::NONE)],
            label,
            description,
            action,
        }
    }

    pub fn or(mut self, key: KeyCode, modifiers: KeyModifiers) -> Self {
        self.keys.push((key, modifiers));
        self
    }

    /// Shift is folded into the character for `Char` keys
    pub fn matches(&self, event: &KeyEvent) -> bool {
        let modifiers = match event.code {
            KeyCode::Char(_) => event.modifiers - KeyModifiers::SHIFT,
            _ => event.modifiers,
        };
        self.keys
            .iter()
            .any(|(key, mods)| *key == event.code && *mods == modifiers)
    }
}

/// Application key mappings
#[derive(Debug, Clone)]
pub struct KeyMap {
    bindings: Vec<KeyBinding>,
}

impl Default for KeyMap {
    fn default() -> Self {
        use Action::*;
        use KeyCode::*;

        let bindings = vec![
            KeyBinding::new(Char('q'), "q", "Quit", Quit).or(Char('c'), KeyModifiers::CONTROL),
            KeyBinding::new(Char('?'), "?", "Show/hide help", Help),
            KeyBinding::new(Right, "→/l", "Next page", NextPage).or(Char('l'), KeyModifiers::NONE),
            KeyBinding::new(Left, "←/h", "Previous page", PrevPage).or(Char('h'), KeyModifiers::NONE),
            KeyBinding::new(Home, "Home", "First page", FirstPage),
            KeyBinding::new(End, "End", "Last page", LastPage),
            KeyBinding::new(Char('g'), "g", "Go to page", GotoPage),
            KeyBinding::new(Char('/'), "/", "Search (tag:NAME, author:NAME toggle filters)", Search),
            KeyBinding::new(Char('t'), "t/T", "Next/previous tag", NextTag),
            KeyBinding::new(Char('T'), "", "", PrevTag),
            KeyBinding::new(Char('a'), "a/A", "Next/previous author", NextAuthor),
            KeyBinding::new(Char('A'), "", "", PrevAuthor),
            KeyBinding::new(Char('c'), "c", "Clear filters", ClearFilters),
            KeyBinding::new(Char('+'), "+/-", "Page size", LargerPages).or(Char('='), KeyModifiers::NONE),
            KeyBinding::new(Char('-'), "", "", SmallerPages),
            KeyBinding::new(Char('r'), "r", "Refresh", Refresh),
            KeyBinding::new(Char('p'), "p", "Prefetch next page", Prefetch),
            KeyBinding::new(Char('m'), "m", "Toggle dark/light", ToggleTheme),
        ];

        Self { bindings }
    }
}

impl KeyMap {
    /// Action bound to `event`, if any
    pub fn action(&self, event: &KeyEvent) -> Option<Action> {
        self.bindings
            .iter()
            .find(|binding| binding.matches(event))
            .map(|binding| binding.action)
    }

    /// `(keys, description)` rows for the help overlay
    pub fn help_entries(&self) -> Vec<(&'static str, &'static str)> {
        self.bindings
            .iter()
            .filter(|binding| !binding.label.is_empty())
            .map(|binding| (binding.label, binding.description))
            .collect()
    }
}
