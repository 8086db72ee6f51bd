//! Built-in HTML pages: the IdP user chooser and the fatal error page.

use crate::directory::Directory;

/// Environment variables naming the deployment environment.
const ENVIRONMENT_VARS: [&str; 2] = ["SHIBSIM_ENV", "RACK_ENV"];

/// A page the simulator answers with instead of forwarding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Page {
    /// Simulated IdP login page listing the test users.
    Chooser {
        message: Option<String>,
        destination: Option<String>,
    },

    /// Simulator failure.
    FatalError {
        message: String,
        detail: Option<String>,
    },
}

/// Should fatal pages carry error detail?
///
/// Only in debug mode, and never when the environment says production.
pub fn show_error_detail(debug: bool) -> bool {
    debug && !is_production()
}

fn is_production() -> bool {
    ENVIRONMENT_VARS.iter().any(|var| {
        std::env::var(var)
            .map(|v| v.eq_ignore_ascii_case("production"))
            .unwrap_or(false)
    })
}

/// Render a page to HTML.
pub fn render(page: &Page, directory: &Directory, login_path: &str) -> String {
    match page {
        Page::Chooser {
            message,
            destination,
        } => render_chooser(
            directory,
            login_path,
            message.as_deref(),
            destination.as_deref(),
        ),
        Page::FatalError { message, detail } => render_fatal(message, detail.as_deref()),
    }
}

fn render_chooser(
    directory: &Directory,
    login_path: &str,
    message: Option<&str>,
    destination: Option<&str>,
) -> String {
    let notice = message
        .map(|m| format!(r#"<p class="message">{}</p>"#, html_escape(m)))
        .unwrap_or_default();

    let mut organisations = String::new();
    for (name, users) in directory.organisations() {
        organisations.push_str(&format!("<h2>{}</h2>\n<ul>\n", html_escape(name)));
        for user in users {
            let mut href = format!("{}?user={}", login_path, urlencoding::encode(&user.id));
            if let Some(dest) = destination {
                href.push_str(&format!("&destination={}", urlencoding::encode(dest)));
            }
            organisations.push_str(&format!(
                "<li><a href=\"{}\">{}</a> <small>({})</small></li>\n",
                html_escape(&href),
                html_escape(user.display_name()),
                html_escape(&user.id)
            ));
        }
        organisations.push_str("</ul>\n");
    }

    format!(
        r#"<!DOCTYPE html>
<html>
<head>
    <title>Shibboleth Simulator: Login</title>
</head>
<body>
    <h1>Simulated Identity Provider</h1>
    {}
    <p>Choose a user to log in as.</p>
    {}
</body>
</html>"#,
        notice, organisations
    )
}

fn render_fatal(message: &str, detail: Option<&str>) -> String {
    let detail = detail
        .map(|d| format!("<pre>{}</pre>", html_escape(d)))
        .unwrap_or_default();

    format!(
        r#"<!DOCTYPE html>
<html>
<head>
    <title>Shibboleth Simulator: Error</title>
</head>
<body>
    <h1>Shibboleth Simulator Error</h1>
    <p>{}</p>
    {}
</body>
</html>"#,
        html_escape(message),
        detail
    )
}

/// HTML escape for XSS prevention
fn html_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#x27;")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::fixtures;

    #[test]
    fn test_chooser_lists_users_by_organisation() {
        let directory = fixtures::directory();
        let page = Page::Chooser {
            message: None,
            destination: Some("/app?x=1".to_string()),
        };
        let html = render(&page, &directory, "/shibsim_idp/login");

        assert!(html.contains("<h2>Analytical University</h2>"));
        assert!(html.contains("<h2>Compiler College</h2>"));
        assert!(html.contains("Ada Lovelace"));
        assert!(html.contains("/shibsim_idp/login?user=42&amp;destination=%2Fapp%3Fx%3D1"));
        assert!(html.find("Analytical University") < html.find("Compiler College"));
    }

    #[test]
    fn test_chooser_message_is_escaped() {
        let directory = fixtures::directory();
        let page = Page::Chooser {
            message: Some("User with ID '<b>' could not be found!".to_string()),
            destination: None,
        };
        let html = render(&page, &directory, "/login");
        assert!(html.contains("&lt;b&gt;"));
        assert!(!html.contains("<b>"));
    }

    #[test]
    fn test_fatal_page() {
        let directory = fixtures::directory();
        let page = Page::FatalError {
            message: "Missing user details".to_string(),
            detail: None,
        };
        let html = render(&page, &directory, "/login");
        assert!(html.contains("Missing user details"));
        assert!(!html.contains("<pre>"));

        let page = Page::FatalError {
            message: "boom".to_string(),
            detail: Some("caused by: <io>".to_string()),
        };
        let html = render(&page, &directory, "/login");
        assert!(html.contains("<pre>caused by: &lt;io&gt;</pre>"));
    }

    #[test]
    fn test_no_detail_without_debug() {
        assert!(!show_error_detail(false));
    }

    #[test]
    fn test_html_escape() {
        assert_eq!(html_escape("<a href=\"x\">&'"), "&lt;a href=&quot;x&quot;&gt;&amp;&#x27;");
    }
}
