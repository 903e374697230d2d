use super::rules::Rule;
use crate::error::RuleError;
use crate::network::packet::PacketEvent;
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Show,
    Suppress,
}

/// 許可ルール > フィルタルール > デフォルト表示 の優先順位で判定する
pub fn decide(allow_rules: &[Rule], filter_rules: &[Rule], event: &PacketEvent) -> Disposition {
    if allow_rules.iter().any(|rule| rule.matches(event)) {
        return Disposition::Show;
    }
    if filter_rules.iter().any(|rule| rule.matches(event)) {
        return Disposition::Suppress;
    }
    Disposition::Show
}

/// 許可ルールとフィルタルールの2つの順序付きリスト
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleBook {
    #[serde(default)]
    allow: Vec<Rule>,
    #[serde(default)]
    filter: Vec<Rule>,
}

impl RuleBook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_json(json: &str) -> Result<Self, RuleError> {
        serde_json::from_str(json).map_err(|e| RuleError::RulesFile(e.to_string()))
    }

    pub fn load_file(path: &Path) -> Result<Self, RuleError> {
        let json = std::fs::read_to_string(path)
            .map_err(|e| RuleError::RulesFile(format!("{}: {}", path.display(), e)))?;
        Self::from_json(&json)
    }

    pub fn allows(&self) -> &[Rule] {
        &self.allow
    }

    pub fn filters(&self) -> &[Rule] {
        &self.filter
    }

    pub fn add_allow(&mut self, rule: Rule) {
        self.allow.push(rule);
    }

    pub fn add_filter(&mut self, rule: Rule) {
        self.filter.push(rule);
    }

    /// 一致するルールをすべて削除し、削除した件数を返す
    pub fn remove_allow(&mut self, rule: &Rule) -> usize {
        let before = self.allow.len();
        self.allow.retain(|r| r != rule);
        before - self.allow.len()
    }

    pub fn remove_filter(&mut self, rule: &Rule) -> usize {
        let before = self.filter.len();
        self.filter.retain(|r| r != rule);
        before - self.filter.len()
    }

    /// ワイルドカードのフィルタを追加し、許可ルールに一致しないものをすべて抑止する
    pub fn filter_all(&mut self) {
        self.add_filter(Rule::any());
    }

    pub fn decide(&self, event: &PacketEvent) -> Disposition {
        decide(&self.allow, &self.filter, event)
    }
}
