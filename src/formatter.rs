//! Renders product records into publishable posts.
use crate::model::{PostRecord, ProductRecord};

/// Fixed post layout; only the closing promotional line is configurable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostTemplate {
    pub promo_line: String,
}

impl PostTemplate {
    pub fn new(promo_line: impl Into<String>) -> Self {
        Self {
            promo_line: promo_line.into(),
        }
    }

    pub fn render(&self, product: &ProductRecord) -> String {
        format!(
            "💥 {} - {}\n💸 Fiyat: {}\n🛒 Siparis ve detay: {}\n\n{}",
            product.category.to_uppercase(),
            product.name,
            product.price,
            product.link,
            self.promo_line,
        )
    }
}

pub fn format_post(product: &ProductRecord, template: &PostTemplate) -> PostRecord {
    PostRecord {
        category: product.category.clone(),
        text: template.render(product),
        image: product.image.clone(),
        link: product.link.clone(),
    }
}

/// Total and pure: one post per product, in input order.
pub fn format(products: &[ProductRecord], template: &PostTemplate) -> Vec<PostRecord> {
    products.iter().map(|p| format_post(p, template)).collect()
}
