//! Route gating.
//!
//! Every page path belongs to one access class. `authorize` is a pure function
//! of the path, the query string and the verified session role; the axum layer
//! in [`middleware`] feeds it and turns the decision into a response.
//!
//! Class precedence is fixed: admin-only, then protected, then auth-only,
//! then public. Table order never changes the outcome.

pub mod middleware;

use url::form_urlencoded;

use crate::directory::Role;

pub const LOGIN_PATH: &str = "/login";
pub const DENIED_LOCATION: &str = "/?error=access_denied";
pub const DEFAULT_LANDING_PATH: &str = "/posts";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RouteClass {
    Public,
    AuthOnly,
    Protected,
    AdminOnly,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Decision {
    Allow,
    /// No valid session; `location` points at the login page with the return target.
    Login { location: String },
    /// Valid session without the admin role.
    AccessDenied { location: String },
    /// Valid session on a login-flow page.
    AlreadyAuthenticated { location: String },
}

impl Decision {
    /// Redirect target, or `None` when the request may proceed.
    #[must_use]
    pub fn location(&self) -> Option<&str> {
        match self {
            Self::Allow => None,
            Self::Login { location }
            | Self::AccessDenied { location }
            | Self::AlreadyAuthenticated { location } => Some(location),
        }
    }
}

/// `/admin` covers `/admin` and `/admin/users`, never `/administrators`.
fn segment_match(path: &str, prefix: &str) -> bool {
    if prefix == "/" {
        return true;
    }
    let prefix = prefix.trim_end_matches('/');
    match path.strip_prefix(prefix) {
        Some(rest) => rest.is_empty() || rest.starts_with('/'),
        None => false,
    }
}

const ASSET_EXTENSIONS: &[&str] = &[
    "css", "js", "map", "png", "jpg", "jpeg", "gif", "svg", "ico", "webp", "woff", "woff2", "ttf",
    "txt", "xml",
];

#[derive(Clone, Debug)]
pub struct RouteTable {
    rules: Vec<(String, RouteClass)>,
    exclusions: Vec<String>,
    landing: String,
}

impl Default for RouteTable {
    fn default() -> Self {
        let rules = [
            ("/admin", RouteClass::AdminOnly),
            ("/posts", RouteClass::Protected),
            ("/write", RouteClass::Protected),
            ("/mypage", RouteClass::Protected),
            ("/bookmarks", RouteClass::Protected),
            ("/notifications", RouteClass::Protected),
            ("/search", RouteClass::Protected),
            ("/login", RouteClass::AuthOnly),
            ("/register", RouteClass::AuthOnly),
            ("/verify-otp", RouteClass::AuthOnly),
        ];
        let exclusions = [
            "/_next", "/static", "/assets", "/favicon.ico", "/robots.txt", "/health", "/v1/auth",
        ];
        Self {
            rules: rules
                .into_iter()
                .map(|(prefix, class)| (prefix.to_string(), class))
                .collect(),
            exclusions: exclusions.into_iter().map(str::to_string).collect(),
            landing: DEFAULT_LANDING_PATH.to_string(),
        }
    }
}

impl RouteTable {
    #[must_use]
    pub fn empty() -> Self {
        Self {
            rules: Vec::new(),
            exclusions: Vec::new(),
            landing: DEFAULT_LANDING_PATH.to_string(),
        }
    }

    #[must_use]
    pub fn with_rule(mut self, prefix: &str, class: RouteClass) -> Self {
        self.rules.push((prefix.to_string(), class));
        self
    }

    #[must_use]
    pub fn with_exclusion(mut self, prefix: &str) -> Self {
        self.exclusions.push(prefix.to_string());
        self
    }

    #[must_use]
    pub fn with_landing(mut self, landing: &str) -> Self {
        self.landing = landing.to_string();
        self
    }

    /// Assets and framework internals skip the gate entirely.
    ///
    /// A static-file extension only counts on paths that classify as public.
    #[must_use]
    pub fn is_excluded(&self, path: &str) -> bool {
        if self
            .exclusions
            .iter()
            .any(|prefix| segment_match(path, prefix))
        {
            return true;
        }
        if self.classify(path) != RouteClass::Public {
            return false;
        }
        path.rsplit('/')
            .next()
            .and_then(|last| last.rsplit_once('.'))
            .is_some_and(|(_, ext)| ASSET_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
    }

    /// Strictest class among all matching prefixes.
    #[must_use]
    pub fn classify(&self, path: &str) -> RouteClass {
        self.rules
            .iter()
            .filter(|(prefix, _)| segment_match(path, prefix))
            .map(|(_, class)| *class)
            .max()
            .unwrap_or(RouteClass::Public)
    }

    /// Decide what to do with a request for `path?query`.
    ///
    /// `session` is the role from a verified session token, `None` when the
    /// token is missing, forged or expired.
    #[must_use]
    pub fn authorize(&self, path: &str, query: Option<&str>, session: Option<Role>) -> Decision {
        if self.is_excluded(path) {
            return Decision::Allow;
        }
        match (self.classify(path), session) {
            (RouteClass::AdminOnly | RouteClass::Protected, None) => Decision::Login {
                location: login_location(path, query),
            },
            (RouteClass::AdminOnly, Some(role)) if role != Role::Admin => Decision::AccessDenied {
                location: DENIED_LOCATION.to_string(),
            },
            (RouteClass::AuthOnly, Some(_)) => Decision::AlreadyAuthenticated {
                location: self.landing.clone(),
            },
            _ => Decision::Allow,
        }
    }
}

/// `/login?redirect=<path?query>` with the return target percent-encoded.
#[must_use]
pub fn login_location(path: &str, query: Option<&str>) -> String {
    let target = match query.filter(|q| !q.is_empty()) {
        Some(query) => format!("{path}?{query}"),
        None => path.to_string(),
    };
    let encoded: String = form_urlencoded::byte_serialize(target.as_bytes()).collect();
    format!("{LOGIN_PATH}?redirect={encoded}")
}
