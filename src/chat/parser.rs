use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

use crate::money::parse_amount_text;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Lang {
    Es,
    En,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Intent {
    Expense {
        amount: f64,
        category: String,
        description: String,
    },
    Income {
        amount: f64,
        source: Option<String>,
    },
    DebtPayment {
        amount: f64,
        creditor: String,
    },
    UpdatePlan,
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParsedMessage {
    pub intent: Intent,
    pub lang: Lang,
}

const AMOUNT: &str = r"\$?\s*(?P<amount>\d[\d.,]*)\s*(?:pesos|dolares|usd|eur|euros|dollars|bucks)?";

fn compile(pattern: String) -> Regex {
    Regex::new(&pattern).expect("chat intent pattern to compile")
}

static EXPENSE_ES: Lazy<Regex> = Lazy::new(|| {
    compile(format!(
        r"^(?:yo\s+)?(?:gaste|he gastado|gastamos|compre|pague)\s+{AMOUNT}\s+(?:en|por|de)\s+(?:la\s+|el\s+|los\s+|las\s+|mi\s+)?(?P<what>.+)$"
    ))
});
static EXPENSE_EN: Lazy<Regex> = Lazy::new(|| {
    compile(format!(
        r"^(?:i\s+)?(?:spent|have spent|just spent|paid|bought)\s+{AMOUNT}\s+(?:on|for|at)\s+(?:the\s+|my\s+|some\s+)?(?P<what>.+)$"
    ))
});
static INCOME_ES: Lazy<Regex> = Lazy::new(|| {
    compile(format!(
        r"^(?:yo\s+)?(?:recibi|me pagaron|cobre|gane|ingrese)\s+{AMOUNT}(?:\s+(?:de|del|por)\s+(?:la\s+|el\s+|mi\s+)?(?P<what>.+))?$"
    ))
});
static INCOME_EN: Lazy<Regex> = Lazy::new(|| {
    compile(format!(
        r"^(?:i\s+)?(?:received|got paid|earned|got)\s+{AMOUNT}(?:\s+(?:from|for)\s+(?:the\s+|my\s+)?(?P<what>.+))?$"
    ))
});
static PAYMENT_ES: Lazy<Regex> = Lazy::new(|| {
    compile(format!(
        r"^(?:yo\s+)?(?:pague|abone|he pagado)\s+{AMOUNT}\s+(?:a|al)\s+(?:la\s+|el\s+|mi\s+|tarjeta\s+)*(?P<what>.+)$"
    ))
});
static PAYMENT_EN: Lazy<Regex> = Lazy::new(|| {
    compile(format!(
        r"^(?:i\s+)?(?:paid|have paid|paid off)\s+{AMOUNT}\s+(?:to|towards|toward|into)\s+(?:my\s+|the\s+)?(?P<what>.+)$"
    ))
});
static PLAN_ES: Lazy<Regex> = Lazy::new(|| {
    compile(
        r"\b(?:actualiza|actualizar|actualizame|recalcula|recalcular|regenera|genera|nuevo)\b.*\bplan\b"
            .to_string(),
    )
});
static PLAN_EN: Lazy<Regex> = Lazy::new(|| {
    compile(
        r"\b(?:update|refresh|regenerate|recalculate|new)\s+(?:my\s+|the\s+)?(?:financial\s+)?plan\b"
            .to_string(),
    )
});

const SPANISH_HINTS: &[&str] = &[
    "hola", "que", "como", "mi", "por", "favor", "quiero", "cuanto", "gracias", "ayuda",
];

/// Lowercase, strip accents and trailing punctuation, collapse whitespace.
pub fn normalize(message: &str) -> String {
    let stripped: String = message
        .nfd()
        .filter(|c| !is_combining_mark(*c))
        .collect::<String>()
        .to_lowercase();
    let cleaned: String = stripped
        .trim_start_matches(['¿', '¡'])
        .trim_end_matches(['.', '!', '?', ' '])
        .to_string();
    cleaned.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Map the free text after "on"/"en" to one of the expense categories.
pub fn category_for(what: &str) -> &'static str {
    const TABLE: &[(&str, &[&str])] = &[
        (
            "food",
            &[
                "comida", "comidas", "restaurante", "super", "supermercado", "mercado",
                "almuerzo", "cena", "desayuno", "cafe", "food", "groceries", "grocery",
                "lunch", "dinner", "breakfast", "restaurant", "coffee", "pizza",
            ],
        ),
        (
            "transport",
            &[
                "transporte", "gasolina", "uber", "taxi", "bus", "metro", "colectivo",
                "pasaje", "transport", "gas", "fuel", "train", "parking",
            ],
        ),
        (
            "housing",
            &["renta", "alquiler", "arriendo", "hipoteca", "rent", "mortgage"],
        ),
        (
            "utilities",
            &[
                "luz", "agua", "internet", "telefono", "celular", "servicios", "electricity",
                "water", "phone", "utilities",
            ],
        ),
        (
            "entertainment",
            &[
                "cine", "entretenimiento", "salida", "netflix", "juegos", "movies", "movie",
                "entertainment", "games", "concert",
            ],
        ),
        (
            "health",
            &[
                "salud", "farmacia", "medico", "doctor", "medicina", "health", "pharmacy",
                "medicine", "gym", "gimnasio",
            ],
        ),
        (
            "education",
            &[
                "educacion", "escuela", "colegio", "curso", "libros", "school", "course",
                "books", "tuition", "universidad",
            ],
        ),
        (
            "shopping",
            &["ropa", "zapatos", "compras", "clothes", "shoes", "shopping"],
        ),
    ];

    let normalized = normalize(what);
    for word in normalized.split(|c: char| !c.is_alphanumeric()) {
        if word.is_empty() {
            continue;
        }
        if let Some(category) = TABLE
            .iter()
            .find(|(_, words)| words.contains(&word))
            .map(|(category, _)| *category)
        {
            return category;
        }
    }
    "other"
}

fn capture_amount(caps: &regex::Captures<'_>) -> Option<f64> {
    caps.name("amount")
        .and_then(|m| parse_amount_text(m.as_str().trim_end_matches(['.', ','])))
        .filter(|amount| *amount > 0.0)
}

fn capture_what(caps: &regex::Captures<'_>) -> Option<String> {
    caps.name("what")
        .map(|m| m.as_str().trim().to_string())
        .filter(|s| !s.is_empty())
}

fn guess_lang(normalized: &str) -> Lang {
    let spanish = normalized
        .split(|c: char| !c.is_alphanumeric())
        .any(|word| SPANISH_HINTS.contains(&word));
    if spanish {
        Lang::Es
    } else {
        Lang::En
    }
}

/// Classify one chat message. Payments are tried before expenses because
/// "paid X to Y" and "paid X for Y" share a verb.
pub fn parse_message(message: &str) -> ParsedMessage {
    let text = normalize(message);

    let payment = [(&*PAYMENT_ES, Lang::Es), (&*PAYMENT_EN, Lang::En)];
    for (re, lang) in payment {
        if let Some(caps) = re.captures(&text) {
            if let (Some(amount), Some(creditor)) = (capture_amount(&caps), capture_what(&caps)) {
                return ParsedMessage {
                    intent: Intent::DebtPayment { amount, creditor },
                    lang,
                };
            }
        }
    }

    let expense = [(&*EXPENSE_ES, Lang::Es), (&*EXPENSE_EN, Lang::En)];
    for (re, lang) in expense {
        if let Some(caps) = re.captures(&text) {
            if let (Some(amount), Some(description)) = (capture_amount(&caps), capture_what(&caps))
            {
                return ParsedMessage {
                    intent: Intent::Expense {
                        amount,
                        category: category_for(&description).to_string(),
                        description,
                    },
                    lang,
                };
            }
        }
    }

    let income = [(&*INCOME_ES, Lang::Es), (&*INCOME_EN, Lang::En)];
    for (re, lang) in income {
        if let Some(caps) = re.captures(&text) {
            if let Some(amount) = capture_amount(&caps) {
                return ParsedMessage {
                    intent: Intent::Income {
                        amount,
                        source: capture_what(&caps),
                    },
                    lang,
                };
            }
        }
    }

    if PLAN_ES.is_match(&text) {
        return ParsedMessage {
            intent: Intent::UpdatePlan,
            lang: Lang::Es,
        };
    }
    if PLAN_EN.is_match(&text) {
        return ParsedMessage {
            intent: Intent::UpdatePlan,
            lang: Lang::En,
        };
    }

    ParsedMessage {
        intent: Intent::Unknown,
        lang: guess_lang(&text),
    }
}
