//! Request messages.
//!
//! Each transaction is a variant of [`Request`] carrying its own parameter
//! struct. Parameters are emitted as ordered form pairs, sent either as a
//! GET query string or a POST form body.

use crate::capability::TransactionKind;
use crate::metadata::MetadataFormat;
use std::fmt;
use url::form_urlencoded;

/// A RETS transaction request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    Login(LoginParams),
    Search(SearchParams),
    GetMetadata(GetMetadataParams),
    GetObject(GetObjectParams),
    ChangePassword(ChangePasswordParams),
    Logout,
    Action,
}

impl Request {
    pub fn kind(&self) -> TransactionKind {
        match self {
            Request::Login(_) => TransactionKind::Login,
            Request::Search(_) => TransactionKind::Search,
            Request::GetMetadata(_) => TransactionKind::GetMetadata,
            Request::GetObject(_) => TransactionKind::GetObject,
            Request::ChangePassword(_) => TransactionKind::ChangePassword,
            Request::Logout => TransactionKind::Logout,
            Request::Action => TransactionKind::Action,
        }
    }

    /// Human-readable description reported to network monitors.
    pub fn label(&self) -> &'static str {
        match self {
            Request::Login(_) => "Logging in",
            Request::Search(_) => "Executing search",
            Request::GetObject(_) => "Retrieving media object",
            Request::GetMetadata(_) => "Retrieving metadata",
            Request::Logout => "Logging out",
            Request::ChangePassword(_) => "Transmitting change password request",
            Request::Action => "communicating with network",
        }
    }

    /// Ordered form parameters.
    pub fn parameters(&self) -> Vec<(&'static str, String)> {
        match self {
            Request::Login(p) => p.parameters(),
            Request::Search(p) => p.parameters(),
            Request::GetMetadata(p) => p.parameters(),
            Request::GetObject(p) => p.parameters(),
            Request::ChangePassword(p) => p.parameters(),
            Request::Logout | Request::Action => Vec::new(),
        }
    }

    /// Form-encodes the parameters, or `None` when there are none.
    pub fn encode_parameters(&self) -> Option<String> {
        let params = self.parameters();
        if params.is_empty() {
            return None;
        }
        let mut serializer = form_urlencoded::Serializer::new(String::new());
        for (name, value) in &params {
            serializer.append_pair(name, value);
        }
        Some(serializer.finish())
    }
}

/// Login parameters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoginParams {
    pub broker_code: Option<String>,
    pub broker_branch: Option<String>,
}

impl LoginParams {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_broker(mut self, code: impl Into<String>, branch: Option<String>) -> Self {
        self.broker_code = Some(code.into());
        self.broker_branch = branch;
        self
    }

    fn parameters(&self) -> Vec<(&'static str, String)> {
        let Some(code) = self.broker_code.as_deref().filter(|c| !c.is_empty()) else {
            return Vec::new();
        };
        let value = match self.broker_branch.as_deref().filter(|b| !b.is_empty()) {
            Some(branch) => format!("{},{}", code, branch),
            None => code.to_string(),
        };
        vec![("BrokerCode", value)]
    }
}

/// Search result encoding.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SearchFormat {
    Compact,
    #[default]
    CompactDecoded,
}

impl SearchFormat {
    pub fn as_param(&self) -> &'static str {
        match self {
            SearchFormat::Compact => "COMPACT",
            SearchFormat::CompactDecoded => "COMPACT-DECODED",
        }
    }
}

impl fmt::Display for SearchFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_param())
    }
}

/// Whether the server should report a record count.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CountMode {
    #[default]
    None,
    /// Records plus a `COUNT` element.
    WithRecords,
    /// Only the `COUNT` element.
    CountOnly,
}

impl CountMode {
    fn as_param(&self) -> Option<&'static str> {
        match self {
            CountMode::None => None,
            CountMode::WithRecords => Some("1"),
            CountMode::CountOnly => Some("2"),
        }
    }
}

/// Search parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchParams {
    pub search_type: String,
    pub class: String,
    pub query: String,
    pub query_type: String,
    pub format: SearchFormat,
    pub count: CountMode,
    /// `None` sends `Limit=NONE`.
    pub limit: Option<u32>,
    pub offset: Option<u32>,
    pub select: Vec<String>,
    pub standard_names: bool,
    pub restricted_indicator: Option<String>,
}

impl SearchParams {
    pub const DEFAULT_QUERY_TYPE: &'static str = "DMQL2";

    pub fn new(
        search_type: impl Into<String>,
        class: impl Into<String>,
        query: impl Into<String>,
    ) -> Self {
        Self {
            search_type: search_type.into(),
            class: class.into(),
            query: query.into(),
            query_type: Self::DEFAULT_QUERY_TYPE.to_string(),
            format: SearchFormat::default(),
            count: CountMode::default(),
            limit: None,
            offset: None,
            select: Vec::new(),
            standard_names: false,
            restricted_indicator: None,
        }
    }

    pub fn with_query_type(mut self, query_type: impl Into<String>) -> Self {
        self.query_type = query_type.into();
        self
    }

    pub fn with_format(mut self, format: SearchFormat) -> Self {
        self.format = format;
        self
    }

    pub fn with_count(mut self, count: CountMode) -> Self {
        self.count = count;
        self
    }

    pub fn count_only(self) -> Self {
        self.with_count(CountMode::CountOnly)
    }

    pub fn with_limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn with_offset(mut self, offset: u32) -> Self {
        self.offset = Some(offset);
        self
    }

    pub fn with_select<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.select = fields.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_standard_names(mut self, standard_names: bool) -> Self {
        self.standard_names = standard_names;
        self
    }

    pub fn with_restricted_indicator(mut self, indicator: impl Into<String>) -> Self {
        self.restricted_indicator = Some(indicator.into());
        self
    }

    fn parameters(&self) -> Vec<(&'static str, String)> {
        let mut params = vec![
            ("SearchType", self.search_type.clone()),
            ("Class", self.class.clone()),
            ("Query", self.query.clone()),
            ("QueryType", self.query_type.clone()),
            ("Format", self.format.as_param().to_string()),
        ];
        if let Some(count) = self.count.as_param() {
            params.push(("Count", count.to_string()));
        }
        params.push((
            "Limit",
            self.limit
                .map(|l| l.to_string())
                .unwrap_or_else(|| "NONE".to_string()),
        ));
        if let Some(offset) = self.offset {
            params.push(("Offset", offset.to_string()));
        }
        if !self.select.is_empty() {
            params.push(("Select", self.select.join(",")));
        }
        if self.standard_names {
            params.push(("StandardNames", "1".to_string()));
        }
        if let Some(indicator) = &self.restricted_indicator {
            params.push(("RestrictedIndicator", indicator.clone()));
        }
        params
    }
}

impl fmt::Display for SearchParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "SearchType={} Class={} Query={}",
            self.search_type, self.class, self.query
        )
    }
}

/// GetMetadata parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GetMetadataParams {
    /// Metadata type without the `METADATA-` prefix, e.g. `SYSTEM`.
    pub metadata_type: String,
    pub id: String,
    pub format: MetadataFormat,
}

impl GetMetadataParams {
    pub fn new(metadata_type: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            metadata_type: metadata_type.into(),
            id: id.into(),
            format: MetadataFormat::default(),
        }
    }

    /// The full system metadata tree.
    pub fn system() -> Self {
        Self::new("SYSTEM", "*")
    }

    pub fn with_format(mut self, format: MetadataFormat) -> Self {
        self.format = format;
        self
    }

    fn parameters(&self) -> Vec<(&'static str, String)> {
        let metadata_type = if self
            .metadata_type
            .to_ascii_uppercase()
            .starts_with("METADATA-")
        {
            self.metadata_type.clone()
        } else {
            format!("METADATA-{}", self.metadata_type)
        };
        vec![
            ("Type", metadata_type),
            ("ID", self.id.clone()),
            ("Format", self.format.as_param().to_string()),
        ]
    }
}

impl fmt::Display for GetMetadataParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Type={} ID={}", self.metadata_type, self.id)
    }
}

/// GetObject parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GetObjectParams {
    pub resource: String,
    pub object_type: String,
    /// Entity id and the object ids requested for it; empty means `*`.
    pub ids: Vec<(String, Vec<String>)>,
    /// Ask for URLs instead of object bytes.
    pub location: bool,
}

impl GetObjectParams {
    pub fn new(resource: impl Into<String>, object_type: impl Into<String>) -> Self {
        Self {
            resource: resource.into(),
            object_type: object_type.into(),
            ids: Vec::new(),
            location: false,
        }
    }

    /// Adds all objects of an entity.
    pub fn add_entity(mut self, entity: impl Into<String>) -> Self {
        let entity = entity.into();
        if !self.ids.iter().any(|(e, _)| *e == entity) {
            self.ids.push((entity, Vec::new()));
        }
        self
    }

    /// Adds one object of an entity.
    pub fn add_object(mut self, entity: impl Into<String>, object_id: impl Into<String>) -> Self {
        let entity = entity.into();
        let object_id = object_id.into();
        match self.ids.iter_mut().find(|(e, _)| *e == entity) {
            Some((_, objects)) => objects.push(object_id),
            None => self.ids.push((entity, vec![object_id])),
        }
        self
    }

    pub fn with_location(mut self, location: bool) -> Self {
        self.location = location;
        self
    }

    /// The `ID` parameter value: `entity:obj1:obj2,entity2:*`.
    pub fn id_param(&self) -> String {
        self.ids
            .iter()
            .map(|(entity, objects)| {
                if objects.is_empty() {
                    format!("{}:*", entity)
                } else {
                    format!("{}:{}", entity, objects.join(":"))
                }
            })
            .collect::<Vec<_>>()
            .join(",")
    }

    fn parameters(&self) -> Vec<(&'static str, String)> {
        vec![
            ("Resource", self.resource.clone()),
            ("Type", self.object_type.clone()),
            ("ID", self.id_param()),
            ("Location", if self.location { "1" } else { "0" }.to_string()),
        ]
    }
}

/// ChangePassword parameters.
///
/// The `PWD` value must already be encrypted and encoded by the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangePasswordParams {
    pub pwd: String,
}

impl ChangePasswordParams {
    pub fn new(pwd: impl Into<String>) -> Self {
        Self { pwd: pwd.into() }
    }

    fn parameters(&self) -> Vec<(&'static str, String)> {
        vec![("PWD", self.pwd.clone())]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_search_parameters_defaults() {
        let params = SearchParams::new("Property", "RES", "(ListPrice=100000+)");
        let pairs = params.parameters();
        assert_eq!(
            pairs,
            vec![
                ("SearchType", "Property".to_string()),
                ("Class", "RES".to_string()),
                ("Query", "(ListPrice=100000+)".to_string()),
                ("QueryType", "DMQL2".to_string()),
                ("Format", "COMPACT-DECODED".to_string()),
                ("Limit", "NONE".to_string()),
            ]
        );
    }

    #[test]
    fn test_search_parameters_full() {
        let params = SearchParams::new("Property", "RES", "(A=1)")
            .with_format(SearchFormat::Compact)
            .with_count(CountMode::WithRecords)
            .with_limit(50)
            .with_offset(101)
            .with_select(["ListingID", "ListPrice"])
            .with_standard_names(true)
            .with_restricted_indicator("****");
        let pairs = params.parameters();
        assert!(pairs.contains(&("Format", "COMPACT".to_string())));
        assert!(pairs.contains(&("Count", "1".to_string())));
        assert!(pairs.contains(&("Limit", "50".to_string())));
        assert!(pairs.contains(&("Offset", "101".to_string())));
        assert!(pairs.contains(&("Select", "ListingID,ListPrice".to_string())));
        assert!(pairs.contains(&("StandardNames", "1".to_string())));
        assert!(pairs.contains(&("RestrictedIndicator", "****".to_string())));

        let count_only = SearchParams::new("Property", "RES", "(A=1)").count_only();
        assert!(count_only
            .parameters()
            .contains(&("Count", "2".to_string())));
    }

    #[test]
    fn test_encode_parameters() {
        let request = Request::Search(SearchParams::new("Property", "RES", "(City=San Jose)"));
        let encoded = request.encode_parameters().unwrap();
        assert!(encoded.starts_with("SearchType=Property&Class=RES&Query=%28City%3DSan+Jose%29"));

        assert_eq!(Request::Logout.encode_parameters(), None);
        assert_eq!(Request::Login(LoginParams::new()).encode_parameters(), None);
    }

    #[test]
    fn test_login_broker_code() {
        let params = LoginParams::new().with_broker("ABC", Some("01".into()));
        assert_eq!(params.parameters(), vec![("BrokerCode", "ABC,01".to_string())]);

        let params = LoginParams::new().with_broker("ABC", None);
        assert_eq!(params.parameters(), vec![("BrokerCode", "ABC".to_string())]);
    }

    #[test]
    fn test_get_object_ids() {
        let params = GetObjectParams::new("Property", "Photo")
            .add_object("123", "1")
            .add_object("123", "2")
            .add_entity("456")
            .with_location(true);
        assert_eq!(params.id_param(), "123:1:2,456:*");
        let pairs = params.parameters();
        assert!(pairs.contains(&("Location", "1".to_string())));
        assert!(pairs.contains(&("Type", "Photo".to_string())));
    }

    #[test]
    fn test_metadata_type_prefix() {
        let params = GetMetadataParams::system();
        assert_eq!(
            params.parameters()[0],
            ("Type", "METADATA-SYSTEM".to_string())
        );
        let params = GetMetadataParams::new("METADATA-CLASS", "Property")
            .with_format(MetadataFormat::Compact);
        let pairs = params.parameters();
        assert_eq!(pairs[0], ("Type", "METADATA-CLASS".to_string()));
        assert_eq!(pairs[2], ("Format", "COMPACT".to_string()));
    }

    #[test]
    fn test_labels_and_kinds() {
        assert_eq!(Request::Logout.label(), "Logging out");
        assert_eq!(Request::Action.label(), "communicating with network");
        assert_eq!(
            Request::ChangePassword(ChangePasswordParams::new("x")).kind(),
            TransactionKind::ChangePassword
        );
    }
}
