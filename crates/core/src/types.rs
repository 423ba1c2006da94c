use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// Public tracking methods an integration accepts.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Method {
    Track,
    Page,
    Identify,
    Group,
    Alias,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Track => "track",
            Method::Page => "page",
            Method::Identify => "identify",
            Method::Group => "group",
            Method::Alias => "alias",
        }
    }
}

impl std::fmt::Display for Method {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A normalized tracking call, independent of any vendor's wire format.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "method", rename_all = "lowercase")]
pub enum Call {
    Track {
        event: String,
        #[serde(default)]
        properties: Map<String, Value>,
    },
    Page {
        category: Option<String>,
        name: Option<String>,
        #[serde(default)]
        properties: Map<String, Value>,
        /// Set on the first page call after initialize for integrations whose
        /// tag records a page view on its own.
        #[serde(default)]
        initial: bool,
    },
    Identify {
        user_id: Option<String>,
        #[serde(default)]
        traits: Map<String, Value>,
    },
    Group {
        group_id: String,
        #[serde(default)]
        traits: Map<String, Value>,
    },
    Alias { to: String, from: Option<String> },
}

impl Call {
    pub fn track(event: impl Into<String>, properties: Map<String, Value>) -> Self {
        Call::Track {
            event: event.into(),
            properties,
        }
    }

    pub fn page(name: Option<String>, properties: Map<String, Value>) -> Self {
        Call::Page {
            category: None,
            name,
            properties,
            initial: false,
        }
    }

    pub fn identify(user_id: Option<String>, traits: Map<String, Value>) -> Self {
        Call::Identify { user_id, traits }
    }

    pub fn method(&self) -> Method {
        match self {
            Call::Track { .. } => Method::Track,
            Call::Page { .. } => Method::Page,
            Call::Identify { .. } => Method::Identify,
            Call::Group { .. } => Method::Group,
            Call::Alias { .. } => Method::Alias,
        }
    }

    /// Event name for track calls, page name for page calls.
    pub fn label(&self) -> Option<&str> {
        match self {
            Call::Track { event, .. } => Some(event),
            Call::Page { name, .. } => name.as_deref(),
            Call::Identify { user_id, .. } => user_id.as_deref(),
            Call::Group { group_id, .. } => Some(group_id),
            Call::Alias { to, .. } => Some(to),
        }
    }
}

/// A call held by an integration's queue until the vendor script is ready.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallRecord {
    pub id: Uuid,
    pub call: Call,
    pub enqueued_at: DateTime<Utc>,
}

impl CallRecord {
    pub fn new(call: Call) -> Self {
        Self {
            id: Uuid::new_v4(),
            call,
            enqueued_at: Utc::now(),
        }
    }

    pub fn method(&self) -> Method {
        self.call.method()
    }
}

/// One invocation of a vendor global, e.g. `_pa.track("Signed Up", {...})`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VendorCall {
    /// Dotted path of the vendor function, rooted at a declared global.
    pub target: String,
    pub args: Vec<Value>,
    /// Assign `args[0]` to `target` instead of calling it.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub assign: bool,
    /// Only assign when `target` is undefined (`target = target || value`).
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub keep_existing: bool,
}

impl VendorCall {
    pub fn new(target: impl Into<String>, args: Vec<Value>) -> Self {
        Self {
            target: target.into(),
            args,
            assign: false,
            keep_existing: false,
        }
    }

    /// `target = value`, e.g. `_pa.orderId = "o-1"`.
    pub fn assign(target: impl Into<String>, value: Value) -> Self {
        Self {
            target: target.into(),
            args: vec![value],
            assign: true,
            keep_existing: false,
        }
    }

    /// Pre-load stub: `target = target || value`. An already loaded vendor
    /// library is left untouched.
    pub fn stub(target: impl Into<String>, value: Value) -> Self {
        Self {
            keep_existing: true,
            ..Self::assign(target, value)
        }
    }

    /// The global symbol this call goes through (`_pa` for `_pa.track`).
    pub fn root(&self) -> &str {
        self.target.split('.').next().unwrap_or(&self.target)
    }
}

impl std::fmt::Display for VendorCall {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.assign {
            let value = self.args.first().unwrap_or(&Value::Null);
            if self.keep_existing {
                return write!(f, "{0} = {0} || {1}", self.target, value);
            }
            return write!(f, "{} = {}", self.target, value);
        }
        let args: Vec<String> = self.args.iter().map(Value::to_string).collect();
        write!(f, "{}({})", self.target, args.join(", "))
    }
}

/// Descriptor defaults overridden by caller-supplied settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(transparent)]
pub struct ResolvedOptions(Map<String, Value>);

impl ResolvedOptions {
    pub fn new(values: Map<String, Value>) -> Self {
        Self(values)
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key).filter(|v| !v.is_null())
    }

    pub fn str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(Value::as_str)
    }

    pub fn bool(&self, key: &str) -> bool {
        self.get(key).and_then(Value::as_bool).unwrap_or(false)
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }
}
