//! Gateway policy snippets that consume an authorization.

use std::fmt;

pub const JWT_AUDIENCE: &str = "https://management.core.windows.net/";

/// What the generated policy does with the access token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolicyPurpose {
    /// Attach the token to the backend request as a bearer header.
    AttachToken,
    /// Return the token in the gateway response.
    ReturnToken,
}

impl PolicyPurpose {
    pub const ALL: [PolicyPurpose; 2] = [PolicyPurpose::AttachToken, PolicyPurpose::ReturnToken];

    pub fn label(self) -> &'static str {
        match self {
            PolicyPurpose::AttachToken => "Attach the access token to the backend call",
            PolicyPurpose::ReturnToken => "Get the access token back",
        }
    }
}

/// Identity the gateway presents when fetching the token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentityType {
    Managed,
    Jwt,
}

impl IdentityType {
    pub const ALL: [IdentityType; 2] = [IdentityType::Managed, IdentityType::Jwt];

    pub fn as_str(self) -> &'static str {
        match self {
            IdentityType::Managed => "managed",
            IdentityType::Jwt => "jwt",
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            IdentityType::Managed => "Use the managed identity of the APIM service.",
            IdentityType::Jwt => "Use the identity of the specified token.",
        }
    }

    fn note(self) -> String {
        match self {
            IdentityType::Managed => {
                "For 'managed' identity-type, make sure managed identity is turned on.".to_string()
            }
            IdentityType::Jwt => format!(
                "For 'jwt' identity-type, please provide a jwt with audience='{}' to 'identity' attribute.",
                JWT_AUDIENCE
            ),
        }
    }

    fn attributes(self) -> String {
        match self {
            IdentityType::Managed => format!("identity-type=\"{}\"", self.as_str()),
            IdentityType::Jwt => format!(
                "identity-type=\"{}\" identity=\"{{jwt with audience='{}'}}\"",
                self.as_str(),
                JWT_AUDIENCE
            ),
        }
    }
}

impl fmt::Display for IdentityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicySnippet {
    pub text: String,
    /// Advisory shown next to the copy confirmation.
    pub note: String,
}

/// Context variable shared by the producing and consuming policy elements.
pub fn context_variable_name(provider: &str, authorization: &str) -> String {
    format!("{}-{}-context", provider, authorization)
}

pub fn generate_policy(
    purpose: PolicyPurpose,
    identity: IdentityType,
    provider: &str,
    authorization: &str,
) -> PolicySnippet {
    let variable = context_variable_name(provider, authorization);
    let context_tag = format!(
        "<get-authorization-context provider-id=\"{provider}\" authorization-id=\"{authorization}\" context-variable-name=\"{variable}\" ignore-error=\"false\" {identity} />",
        identity = identity.attributes(),
    );
    let token = format!(
        "((Authorization)context.Variables.GetValueOrDefault(\"{}\"))?.AccessToken",
        variable
    );

    let consumer = match purpose {
        PolicyPurpose::AttachToken => format!(
            "<set-header name=\"Authorization\" exists-action=\"override\">\n    <value>@(\"Bearer \" + {})</value>\n</set-header>",
            token
        ),
        PolicyPurpose::ReturnToken => format!(
            "<return-response>\n    <set-status code=\"200\" />\n    <set-body template=\"none\">@({})</set-body>\n</return-response>",
            token
        ),
    };

    PolicySnippet {
        text: format!("<!-- Add to the inbound policy -->\n{}\n{}", context_tag, consumer),
        note: identity.note(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_attach_managed_policy() {
        let snippet = generate_policy(PolicyPurpose::AttachToken, IdentityType::Managed, "p1", "a1");
        let lines: Vec<&str> = snippet.text.lines().collect();

        assert_eq!(lines[0], "<!-- Add to the inbound policy -->");
        assert_eq!(
            lines[1],
            r#"<get-authorization-context provider-id="p1" authorization-id="a1" context-variable-name="p1-a1-context" ignore-error="false" identity-type="managed" />"#
        );
        assert_eq!(lines[1].matches("p1-a1-context").count(), 1);
        assert_eq!(
            lines[3],
            r#"    <value>@("Bearer " + ((Authorization)context.Variables.GetValueOrDefault("p1-a1-context"))?.AccessToken)</value>"#
        );
        assert_eq!(snippet.text.matches("p1-a1-context").count(), 2);
        assert_eq!(
            snippet.note,
            "For 'managed' identity-type, make sure managed identity is turned on."
        );
    }

    #[test]
    fn test_return_jwt_policy() {
        let snippet = generate_policy(PolicyPurpose::ReturnToken, IdentityType::Jwt, "github", "me");

        assert!(snippet.text.contains(
            r#"identity-type="jwt" identity="{jwt with audience='https://management.core.windows.net/'}" />"#
        ));
        assert!(snippet.text.contains("<set-status code=\"200\" />"));
        assert!(snippet.text.contains(
            r#"<set-body template="none">@(((Authorization)context.Variables.GetValueOrDefault("github-me-context"))?.AccessToken)</set-body>"#
        ));
        assert!(snippet.text.ends_with("</return-response>"));
        assert!(snippet.note.starts_with("For 'jwt' identity-type"));
    }
}
