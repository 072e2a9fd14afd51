//! Keyword categorization.
//!
//! A [`KeywordTable`] is an ordered list of category names, each with its
//! keywords. The [`CategoryEngine`] resolves a description to the first
//! declared category owning a keyword contained in it. Declaration order is the
//! only tie-break: there is no scoring and no longest-match preference.
use serde::{Deserialize, Serialize};

use crate::bootstrap::UserCategories;
use crate::core::{Category, TxnKind};
use crate::normalize::normalize;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryRule {
    pub name: String,
    pub keywords: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct KeywordFile {
    categories: Vec<CategoryRule>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct KeywordTable {
    rules: Vec<CategoryRule>,
}

impl KeywordTable {
    pub fn new(rules: Vec<CategoryRule>) -> Self {
        Self { rules }
    }

    /// Parses a table from TOML, keeping the declaration order:
    ///
    /// ```toml
    /// [[categories]]
    /// name = "Alimentação"
    /// keywords = ["ifood", "restaurante"]
    /// ```
    pub fn from_toml(content: &str) -> Result<Self, toml::de::Error> {
        let file: KeywordFile = toml::from_str(content)?;
        Ok(Self::new(file.categories))
    }

    pub fn rules(&self) -> &[CategoryRule] {
        &self.rules
    }

    /// The table shipped with the engine.
    pub fn builtin() -> Self {
        Self::new(
            BUILTIN
                .iter()
                .map(|(name, keywords)| CategoryRule {
                    name: name.to_string(),
                    keywords: keywords.iter().map(|k| k.to_string()).collect(),
                })
                .collect(),
        )
    }
}

impl Default for KeywordTable {
    fn default() -> Self {
        Self::builtin()
    }
}

// Order matters: more specific groupings come first so that, e.g., "uber eats"
// lands in Alimentação before "uber" is tried under Transporte.
const BUILTIN: &[(&str, &[&str])] = &[
    (
        "Salário",
        &["salario", "folha de pagamento", "pagamento de salario", "proventos", "adiantamento salarial"],
    ),
    (
        "Investimentos",
        &["aplicacao", "resgate", "cdb", "tesouro direto", "rendimento", "dividendos", "corretora"],
    ),
    (
        "Alimentação",
        &[
            "ifood", "uber eats", "rappi", "restaurante", "lanchonete", "padaria", "supermercado",
            "mercadinho", "hortifruti", "acougue", "pizzaria", "burger", "mcdonalds", "cafeteria",
        ],
    ),
    (
        "Transporte",
        &[
            "uber", "99app", "99 pop", "cabify", "posto", "combustivel", "shell", "ipiranga",
            "estacionamento", "pedagio", "sem parar", "metro", "bilhete unico",
        ],
    ),
    (
        "Moradia",
        &["aluguel", "condominio", "iptu", "energia", "enel", "cemig", "sabesp", "copasa", "gas natural"],
    ),
    (
        "Saúde",
        &["farmacia", "drogaria", "drogasil", "raia", "hospital", "clinica", "laboratorio", "unimed", "amil", "odonto"],
    ),
    (
        "Educação",
        &["escola", "faculdade", "universidade", "curso", "udemy", "alura", "livraria", "mensalidade escolar"],
    ),
    (
        "Lazer",
        &["netflix", "spotify", "disney", "hbo", "prime video", "cinema", "ingresso", "steam", "playstation"],
    ),
    (
        "Compras",
        &["amazon", "mercado livre", "mercadolivre", "magalu", "magazine luiza", "shopee", "aliexpress", "americanas", "shein"],
    ),
    (
        "Serviços",
        &["vivo", "claro", "tim ", "oi fibra", "internet", "assinatura", "google", "apple.com", "microsoft"],
    ),
    (
        "Impostos e Taxas",
        &["tarifa", "iof", "anuidade", "juros", "multa", "darf", "ipva", "imposto"],
    ),
];

struct CompiledRule {
    name: String,
    keywords: Vec<String>,
}

/// Why a transaction received the category it did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// A keyword matched and the user owns that category with the right type.
    Matched,
    /// No keyword matched.
    NoMatch,
    /// A keyword matched a category the user only owns with the other type.
    TypeMismatch,
    /// A keyword matched a category the user does not own.
    UnknownCategory,
}

#[derive(Debug, Clone)]
pub struct Assignment<'a> {
    pub category: &'a Category,
    pub needs_review: bool,
    pub outcome: Outcome,
}

pub struct CategoryEngine {
    rules: Vec<CompiledRule>,
}

impl CategoryEngine {
    pub fn new(table: &KeywordTable) -> Self {
        let rules = table
            .rules()
            .iter()
            .map(|rule| CompiledRule {
                name: rule.name.clone(),
                keywords: rule
                    .keywords
                    .iter()
                    .map(|k| normalize(k))
                    .filter(|k| !k.trim().is_empty())
                    .collect(),
            })
            .collect();

        Self { rules }
    }

    /// Returns the first declared category with a keyword contained in the
    /// normalized description.
    pub fn match_category(&self, description: &str) -> Option<&str> {
        let text = normalize(description);
        if text.trim().is_empty() {
            return None;
        }

        self.rules
            .iter()
            .find(|rule| rule.keywords.iter().any(|k| text.contains(k.as_str())))
            .map(|rule| rule.name.as_str())
    }

    /// Picks the category a transaction of `kind` is stored under. Anything
    /// other than a type-consistent match falls back to the user's default
    /// category for `kind` and is flagged for review.
    pub fn classify<'a>(
        &self,
        description: &str,
        kind: TxnKind,
        categories: &'a UserCategories,
    ) -> Assignment<'a> {
        let fallback = |outcome| Assignment {
            category: categories.fallback(kind),
            needs_review: true,
            outcome,
        };

        let name = match self.match_category(description) {
            Some(name) => name,
            None => return fallback(Outcome::NoMatch),
        };

        match categories.find(name, kind) {
            Some(category) => Assignment {
                category,
                needs_review: false,
                outcome: Outcome::Matched,
            },
            None if categories.has_name(name) => fallback(Outcome::TypeMismatch),
            None => fallback(Outcome::UnknownCategory),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rule(name: &str, keywords: &[&str]) -> CategoryRule {
        CategoryRule {
            name: name.to_string(),
            keywords: keywords.iter().map(|k| k.to_string()).collect(),
        }
    }

    fn category(id: &str, name: &str, kind: TxnKind) -> Category {
        Category {
            id: id.to_string(),
            user_id: "user-1".to_string(),
            name: name.to_string(),
            emoji: String::new(),
            color: String::new(),
            kind,
        }
    }

    fn user_categories() -> UserCategories {
        UserCategories::new(vec![
            category("other-exp", "Other", TxnKind::Expense),
            category("other-inc", "Other", TxnKind::Income),
            category("food", "Alimentação", TxnKind::Expense),
            category("salary", "Salário", TxnKind::Income),
        ])
        .unwrap()
    }

    #[test]
    fn builtin_table_matches_accented_and_cased_descriptions() {
        let engine = CategoryEngine::new(&KeywordTable::builtin());

        assert_eq!(engine.match_category("Ifood *Restaurante XYZ"), Some("Alimentação"));
        assert_eq!(engine.match_category("IFOOD"), Some("Alimentação"));
        assert_eq!(engine.match_category("PAGAMENTO DE SALÁRIO"), Some("Salário"));
        assert_eq!(engine.match_category("Farmácia Pague Menos"), Some("Saúde"));
    }

    #[test]
    fn earlier_category_wins_over_later_keyword() {
        let engine = CategoryEngine::new(&KeywordTable::builtin());

        assert_eq!(engine.match_category("UBER EATS *PEDIDO"), Some("Alimentação"));
        assert_eq!(engine.match_category("UBER *TRIP"), Some("Transporte"));
    }

    #[test]
    fn declaration_order_resolves_overlaps() {
        let first = KeywordTable::new(vec![rule("A", &["cafe"]), rule("B", &["padaria"])]);
        let second = KeywordTable::new(vec![rule("B", &["padaria"]), rule("A", &["cafe"])]);
        let description = "Padaria e Café Central";

        assert_eq!(CategoryEngine::new(&first).match_category(description), Some("A"));
        assert_eq!(CategoryEngine::new(&second).match_category(description), Some("B"));
    }

    #[test]
    fn repeated_calls_are_deterministic() {
        let engine = CategoryEngine::new(&KeywordTable::builtin());
        let first = engine.match_category("Netflix.com assinatura");

        for _ in 0..10 {
            assert_eq!(engine.match_category("Netflix.com assinatura"), first);
        }
    }

    #[test]
    fn empty_or_blank_descriptions_do_not_match() {
        let engine = CategoryEngine::new(&KeywordTable::new(vec![rule("Space", &[" "])]));

        assert_eq!(engine.match_category(""), None);
        assert_eq!(engine.match_category("   "), None);
        assert_eq!(engine.match_category("two words"), None);
    }

    #[test]
    fn unmatched_description_returns_none() {
        let engine = CategoryEngine::new(&KeywordTable::builtin());

        assert_eq!(engine.match_category("Transferência recebida João"), None);
    }

    #[test]
    fn keyword_table_loads_from_toml_in_order() {
        let table = KeywordTable::from_toml(
            r#"
            [[categories]]
            name = "Pets"
            keywords = ["petz", "cobasi"]

            [[categories]]
            name = "Alimentação"
            keywords = ["ifood"]
            "#,
        )
        .unwrap();

        assert_eq!(table.rules()[0], rule("Pets", &["petz", "cobasi"]));
        assert_eq!(table.rules()[1].name, "Alimentação");
        assert!(KeywordTable::from_toml("categories = 3").is_err());
    }

    #[test]
    fn classify_matched_expense() {
        let engine = CategoryEngine::new(&KeywordTable::builtin());
        let categories = user_categories();

        let assignment = engine.classify("Ifood *Restaurante XYZ", TxnKind::Expense, &categories);

        assert_eq!(assignment.category.id, "food");
        assert!(!assignment.needs_review);
        assert_eq!(assignment.outcome, Outcome::Matched);
    }

    #[test]
    fn classify_type_mismatch_uses_fallback() {
        let engine = CategoryEngine::new(&KeywordTable::builtin());
        let categories = user_categories();

        // A refund from the delivery app arrives as an inflow.
        let assignment = engine.classify("Estorno Ifood", TxnKind::Income, &categories);

        assert_eq!(assignment.category.id, "other-inc");
        assert!(assignment.needs_review);
        assert_eq!(assignment.outcome, Outcome::TypeMismatch);
    }

    #[test]
    fn classify_no_match_uses_fallback_for_type() {
        let engine = CategoryEngine::new(&KeywordTable::builtin());
        let categories = user_categories();

        let assignment = engine.classify("Transferência recebida João", TxnKind::Income, &categories);

        assert_eq!(assignment.category.id, "other-inc");
        assert!(assignment.needs_review);
        assert_eq!(assignment.outcome, Outcome::NoMatch);
    }

    #[test]
    fn classify_category_the_user_lacks() {
        let engine = CategoryEngine::new(&KeywordTable::builtin());
        let categories = user_categories();

        let assignment = engine.classify("Uber *Trip", TxnKind::Expense, &categories);

        assert_eq!(assignment.category.id, "other-exp");
        assert_eq!(assignment.outcome, Outcome::UnknownCategory);
    }
}
