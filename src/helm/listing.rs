// Human-readable listing of the cached repository

use crate::cache::CacheStorage;
use crate::error::Result;
use crate::helm::chart::ChartRef;
use crate::helm::index::{release_version, scalar_to_string};
use serde::Serialize;
use serde_yaml::Value as YamlValue;
use tera::{Context, Tera};

const TEMPLATE_NAME: &str = "index.html";
const TEMPLATE: &str = include_str!("../../templates/index.html");

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ListingRelease {
    pub version: String,
    pub urls: Vec<String>,
    /// Seconds since the archive was cached, if it is cached at all
    pub cache_age: Option<u64>,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ListingEntry {
    pub name: String,
    pub releases: Vec<ListingRelease>,
}

/// Collect entries of the rewritten index together with local cache ages
pub async fn build_listing(index_yaml: &str, cache: &CacheStorage) -> Result<Vec<ListingEntry>> {
    let index: YamlValue = serde_yaml::from_str(index_yaml)?;
    let mut listing = Vec::new();

    let Some(entries) = index.get("entries").and_then(|e| e.as_mapping()) else {
        return Ok(listing);
    };

    for (name, releases) in entries {
        let Some(name) = scalar_to_string(name) else {
            continue;
        };

        let mut entry = ListingEntry {
            name,
            releases: Vec::new(),
        };

        for release in releases.as_sequence().into_iter().flatten() {
            if !release.is_mapping() {
                continue;
            }

            let version = release_version(release);
            let urls = release
                .get("urls")
                .and_then(|u| u.as_sequence())
                .map(|urls| urls.iter().filter_map(scalar_to_string).collect())
                .unwrap_or_default();

            let chart = ChartRef {
                name: entry.name.clone(),
                version: version.clone(),
            };
            let cache_age = cache
                .age(&cache.chart_path(&chart.file_name()))
                .await
                .map(|age| age.as_secs());

            entry.releases.push(ListingRelease {
                version,
                urls,
                cache_age,
            });
        }

        listing.push(entry);
    }

    Ok(listing)
}

/// Renders the listing page from the embedded template
pub struct ListingRenderer {
    tera: Tera,
}

impl ListingRenderer {
    pub fn new() -> Result<Self> {
        let mut tera = Tera::default();
        tera.add_raw_template(TEMPLATE_NAME, TEMPLATE)?;
        Ok(Self { tera })
    }

    pub fn render(
        &self,
        upstream_repository: &str,
        repository_source: Option<&str>,
        entries: &[ListingEntry],
    ) -> Result<String> {
        let mut ctx = Context::new();
        ctx.insert("upstream_repository", upstream_repository);
        ctx.insert("repository_source", &repository_source);
        ctx.insert("entries", entries);
        Ok(self.tera.render(TEMPLATE_NAME, &ctx)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const REWRITTEN: &str = r#"
entries:
  foo:
    - version: 1.0.0
      urls:
        - charts/foo-1.0.0.tgz
    - version: 0.9.0
      urls:
        - charts/foo-0.9.0.tgz
"#;

    #[tokio::test]
    async fn test_listing_reports_cache_age_only_for_cached_charts() {
        let temp_dir = TempDir::new().unwrap();
        let cache = CacheStorage::new(
            temp_dir.path().join("index"),
            temp_dir.path().join("charts"),
        )
        .unwrap();
        cache
            .write(&cache.chart_path("foo-1.0.0.tgz"), b"archive")
            .await
            .unwrap();

        let listing = build_listing(REWRITTEN, &cache).await.unwrap();
        assert_eq!(listing.len(), 1);
        assert_eq!(listing[0].name, "foo");

        let releases = &listing[0].releases;
        assert_eq!(releases[0].version, "1.0.0");
        assert_eq!(releases[0].urls, vec!["charts/foo-1.0.0.tgz".to_string()]);
        assert!(releases[0].cache_age.is_some());
        assert_eq!(releases[1].version, "0.9.0");
        assert_eq!(releases[1].cache_age, None);
    }

    #[test]
    fn test_render_page() {
        let renderer = ListingRenderer::new().unwrap();
        let entries = vec![ListingEntry {
            name: "foo".to_string(),
            releases: vec![
                ListingRelease {
                    version: "1.0.0".to_string(),
                    urls: vec!["charts/foo-1.0.0.tgz".to_string()],
                    cache_age: Some(42),
                },
                ListingRelease {
                    version: "0.9.0".to_string(),
                    urls: vec!["charts/foo-0.9.0.tgz".to_string()],
                    cache_age: None,
                },
            ],
        }];

        let html = renderer
            .render("https://charts.example.com", Some("example"), &entries)
            .unwrap();
        // Tera's HTML escaping also escapes '/'
        assert!(html.contains("charts.example.com"));
        assert!(html.contains("Source: example"));
        assert!(html.contains("charts&#x2F;foo-1.0.0.tgz"));
        assert!(html.contains("<td>42</td>"));
        assert!(html.contains("not cached"));
    }
}
