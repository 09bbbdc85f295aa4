use serde::{Deserialize, Serialize};

/// One scraped product, a row of a product batch artifact.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProductRecord {
    #[serde(alias = "kategori")]
    pub category: String,
    #[serde(alias = "urun_adi")]
    pub name: String,
    /// Display-formatted, never parsed.
    #[serde(alias = "fiyat")]
    pub price: String,
    #[serde(alias = "urun_linki")]
    pub link: String,
    /// Empty when the listing has no image.
    #[serde(alias = "resim_linki")]
    pub image: String,
}

/// One publishable post, a row of a post batch artifact.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct PostRecord {
    #[serde(alias = "kategori")]
    pub category: String,
    pub text: String,
    #[serde(alias = "image_url")]
    pub image: String,
    #[serde(alias = "product_link")]
    pub link: String,
}

impl PostRecord {
    pub fn image_url(&self) -> Option<&str> {
        let image = self.image.trim();
        (!image.is_empty()).then_some(image)
    }
}

/// Which kind of batch artifact a file holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchKind {
    Products,
    Posts,
}

impl BatchKind {
    pub fn prefix(&self) -> &'static str {
        match self {
            BatchKind::Products => "trm_products_",
            BatchKind::Posts => "trm_posts_",
        }
    }

    /// Glob used by the batch selector.
    pub fn pattern(&self) -> String {
        format!("{}*.csv", self.prefix())
    }

    pub fn file_name(&self, stamp: &str) -> String {
        format!("{}{}.csv", self.prefix(), stamp)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn image_url_ignores_blank() {
        let mut post = PostRecord::default();
        assert_eq!(post.image_url(), None);
        post.image = "  ".into();
        assert_eq!(post.image_url(), None);
        post.image = "https://cdn/a.jpg".into();
        assert_eq!(post.image_url(), Some("https://cdn/a.jpg"));
    }

    #[test]
    fn batch_names() {
        assert_eq!(BatchKind::Posts.pattern(), "trm_posts_*.csv");
        assert_eq!(
            BatchKind::Products.file_name("20240101_0930"),
            "trm_products_20240101_0930.csv"
        );
    }
}
