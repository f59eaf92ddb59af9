//! Ecosystem aliases and the package keys of the Redis index.

/// Map an ecosystem alias to the GraphQL `SecurityAdvisoryEcosystem` enum value.
///
/// Accepts both the enum spelling (`NUGET`, `PIP`, ...) and the common package
/// manager names (`nuget`, `pypi`, `crates.io`, ...).
pub fn graphql_ecosystem(ecosystem: &str) -> Option<&'static str> {
    match ecosystem.trim().to_ascii_lowercase().as_str() {
        "nuget" | "dotnet" | ".net" => Some("NUGET"),
        "npm" => Some("NPM"),
        "pip" | "pypi" | "python" => Some("PIP"),
        "maven" | "java" => Some("MAVEN"),
        "rust" | "cargo" | "crates.io" => Some("RUST"),
        "go" | "golang" => Some("GO"),
        "composer" | "packagist" | "php" => Some("COMPOSER"),
        "rubygems" | "ruby" | "gem" | "bundler" => Some("RUBYGEMS"),
        "erlang" | "hex" => Some("ERLANG"),
        "pub" | "dart" => Some("PUB"),
        "swift" => Some("SWIFT"),
        "actions" | "github-actions" => Some("ACTIONS"),
        _ => None,
    }
}

/// Fold `package_name` the way the index expects for its ecosystem.
///
/// Names under a known `SecurityAdvisoryEcosystem` are lowercased, except
/// `GO` where module paths keep their case. Unmapped ecosystems are left as is.
pub fn index_package_name(ecosystem: &str, package_name: &str) -> String {
    let name = package_name.trim();
    match graphql_ecosystem(ecosystem) {
        Some("GO") | None => name.to_string(),
        Some(_) => name.to_ascii_lowercase(),
    }
}

/// The `(ecosystem, package)` pair behind a `ghsa:idx:` key, with the
/// ecosystem resolved to its lowercased GraphQL enum spelling.
pub fn index_key_parts(ecosystem: &str, package_name: &str) -> (String, String) {
    let resolved = graphql_ecosystem(ecosystem).unwrap_or(ecosystem);
    (
        resolved.to_ascii_lowercase(),
        index_package_name(resolved, package_name),
    )
}
