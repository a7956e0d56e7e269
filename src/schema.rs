use crate::{
    exchange::ExchangeKind,
    types::{AMQPValue, FieldTable, LongString, ShortString},
    Error, Result,
};
use serde::Deserialize;
use std::collections::HashMap;

/// Values for the `{key}` placeholders of a schema entry.
pub type Replacements = HashMap<String, String>;

/// Resolves logical queue and exchange names into declaration parameters.
pub trait SchemaProvider: Send + Sync {
    /// Fails with [`Error::SchemaNotFound`] for an unknown name.
    ///
    /// [`Error::SchemaNotFound`]: ./enum.Error.html#variant.SchemaNotFound
    fn resolve_queue(
        &self,
        name: &str,
        replacements: Option<&Replacements>,
    ) -> Result<QueueDeclaration>;

    fn resolve_exchange(
        &self,
        name: &str,
        replacements: Option<&Replacements>,
    ) -> Result<ExchangeDeclaration>;
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct ExchangeDeclaration {
    pub name: String,
    pub kind: ExchangeKind,
    pub durable: bool,
    pub auto_delete: bool,
    pub arguments: FieldTable,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Binding {
    pub exchange: ExchangeDeclaration,
    pub routing_key: String,
    pub arguments: FieldTable,
}

/// Everything needed to declare a queue and bind it to its exchanges.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct QueueDeclaration {
    pub name: String,
    pub durable: bool,
    pub exclusive: bool,
    pub auto_delete: bool,
    pub arguments: FieldTable,
    pub bindings: Vec<Binding>,
}

/// An in-memory schema, keyed by logical identifiers such as `$TestQueue`.
///
/// ```rust
/// use lapin_reconnect::{QueueSchema, Replacements, SchemaProvider};
///
/// let schema: QueueSchema = serde_json::from_str(r#"{
///     "exchanges": { "$Events": { "name": "zenoss.events", "type": "topic" } },
///     "queues": {
///         "$TestQueue": {
///             "name": "test.{tenant}",
///             "bindings": [{ "exchange": "$Events", "routing_key": "zenoss.event.{tenant}" }]
///         }
///     }
/// }"#).unwrap();
///
/// let replacements: Replacements = [("tenant".to_owned(), "acme".to_owned())].into();
/// let queue = schema.resolve_queue("$TestQueue", Some(&replacements)).unwrap();
/// assert_eq!(queue.name, "test.acme");
/// assert_eq!(queue.bindings[0].exchange.name, "zenoss.events");
/// assert_eq!(queue.bindings[0].routing_key, "zenoss.event.acme");
/// ```
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct QueueSchema {
    pub exchanges: HashMap<String, ExchangeDefinition>,
    pub queues: HashMap<String, QueueDefinition>,
}

impl QueueSchema {
    #[must_use]
    pub fn with_exchange(mut self, identifier: &str, exchange: ExchangeDefinition) -> Self {
        self.exchanges.insert(identifier.into(), exchange);
        self
    }

    #[must_use]
    pub fn with_queue(mut self, identifier: &str, queue: QueueDefinition) -> Self {
        self.queues.insert(identifier.into(), queue);
        self
    }

    fn exchange(&self, identifier: &str) -> Result<&ExchangeDefinition> {
        self.exchanges
            .get(identifier)
            .ok_or_else(|| Error::SchemaNotFound(identifier.into()))
    }
}

impl SchemaProvider for QueueSchema {
    fn resolve_queue(
        &self,
        name: &str,
        replacements: Option<&Replacements>,
    ) -> Result<QueueDeclaration> {
        let queue = self
            .queues
            .get(name)
            .ok_or_else(|| Error::SchemaNotFound(name.into()))?;
        let bindings = queue
            .bindings
            .iter()
            .map(|binding| {
                Ok(Binding {
                    exchange: self.exchange(&binding.exchange)?.resolve(replacements)?,
                    routing_key: substitute(&binding.routing_key, replacements)?,
                    arguments: field_table(&binding.arguments),
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(QueueDeclaration {
            name: substitute(&queue.name, replacements)?,
            durable: queue.durable,
            exclusive: queue.exclusive,
            auto_delete: queue.auto_delete,
            arguments: field_table(&queue.arguments),
            bindings,
        })
    }

    fn resolve_exchange(
        &self,
        name: &str,
        replacements: Option<&Replacements>,
    ) -> Result<ExchangeDeclaration> {
        self.exchange(name)?.resolve(replacements)
    }
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct ExchangeDefinition {
    pub name: String,
    #[serde(rename = "type", default)]
    pub kind: ExchangeKind,
    #[serde(default = "durable_default")]
    pub durable: bool,
    #[serde(default)]
    pub auto_delete: bool,
    #[serde(default)]
    pub arguments: HashMap<String, ArgumentValue>,
}

impl ExchangeDefinition {
    pub fn new(name: &str, kind: ExchangeKind) -> Self {
        Self {
            name: name.into(),
            kind,
            durable: durable_default(),
            auto_delete: false,
            arguments: HashMap::new(),
        }
    }

    fn resolve(&self, replacements: Option<&Replacements>) -> Result<ExchangeDeclaration> {
        Ok(ExchangeDeclaration {
            name: substitute(&self.name, replacements)?,
            kind: self.kind.clone(),
            durable: self.durable,
            auto_delete: self.auto_delete,
            arguments: field_table(&self.arguments),
        })
    }
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct QueueDefinition {
    pub name: String,
    #[serde(default = "durable_default")]
    pub durable: bool,
    #[serde(default)]
    pub exclusive: bool,
    #[serde(default)]
    pub auto_delete: bool,
    #[serde(default)]
    pub arguments: HashMap<String, ArgumentValue>,
    #[serde(default)]
    pub bindings: Vec<BindingDefinition>,
}

impl QueueDefinition {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.into(),
            durable: durable_default(),
            exclusive: false,
            auto_delete: false,
            arguments: HashMap::new(),
            bindings: Vec::new(),
        }
    }

    /// Bind to the exchange registered under `exchange` in the same schema.
    #[must_use]
    pub fn with_binding(mut self, exchange: &str, routing_key: &str) -> Self {
        self.bindings.push(BindingDefinition {
            exchange: exchange.into(),
            routing_key: routing_key.into(),
            arguments: HashMap::new(),
        });
        self
    }
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct BindingDefinition {
    pub exchange: String,
    #[serde(default)]
    pub routing_key: String,
    #[serde(default)]
    pub arguments: HashMap<String, ArgumentValue>,
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum ArgumentValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

impl From<&ArgumentValue> for AMQPValue {
    fn from(value: &ArgumentValue) -> Self {
        match value {
            ArgumentValue::Bool(b) => AMQPValue::Boolean(*b),
            ArgumentValue::Int(i) => AMQPValue::LongLongInt(*i),
            ArgumentValue::Float(f) => AMQPValue::Double(*f),
            ArgumentValue::Str(s) => AMQPValue::LongString(LongString::from(s.clone())),
        }
    }
}

fn durable_default() -> bool {
    true
}

fn field_table(arguments: &HashMap<String, ArgumentValue>) -> FieldTable {
    let mut table = FieldTable::default();
    for (key, value) in arguments {
        table.insert(ShortString::from(key.clone()), value.into());
    }
    table
}

/// Replace `{key}` placeholders; `{{` and `}}` stand for literal braces.
fn substitute(template: &str, replacements: Option<&Replacements>) -> Result<String> {
    let mut resolved = String::with_capacity(template.len());
    let mut chars = template.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '{' if chars.peek() == Some(&'{') => {
                chars.next();
                resolved.push('{');
            }
            '}' if chars.peek() == Some(&'}') => {
                chars.next();
                resolved.push('}');
            }
            '{' => {
                let mut key = String::new();
                let mut terminated = false;
                for c in chars.by_ref() {
                    if c == '}' {
                        terminated = true;
                        break;
                    }
                    key.push(c);
                }
                if !terminated {
                    resolved.push('{');
                    resolved.push_str(&key);
                    continue;
                }
                match replacements.and_then(|replacements| replacements.get(&key)) {
                    Some(value) => resolved.push_str(value),
                    None => {
                        return Err(Error::MissingReplacement {
                            name: template.into(),
                            key,
                        })
                    }
                }
            }
            c => resolved.push(c),
        }
    }
    Ok(resolved)
}
