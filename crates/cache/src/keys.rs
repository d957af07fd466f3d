//! Cache key layout for catalogue and order reads.

use common::{CategoryId, CustomerId, OrderId, ProductId};

/// Prefix shared by every cached product listing.
pub const PRODUCTS_PREFIX: &str = "products";

/// The cached list of all categories.
pub const CATEGORIES_LIST: &str = "categories:all";

/// A single product.
pub fn product(id: &ProductId) -> String {
    format!("product:{id}")
}

/// One page of the product listing.
pub fn products_page(page: u32, page_size: u32) -> String {
    format!("{PRODUCTS_PREFIX}:page:{page}:size:{page_size}")
}

/// Prefix of every listing of a category's products.
pub fn category_products_prefix(id: CategoryId) -> String {
    format!("category:{id}:products")
}

/// A single order.
pub fn order(id: OrderId) -> String {
    format!("order:{id}")
}

/// Prefix of every listing of a customer's orders.
pub fn customer_orders_prefix(id: CustomerId) -> String {
    format!("orders:customer:{id}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_product_key_is_not_under_listing_prefix() {
        let key = product(&ProductId::new("p1"));
        assert_eq!(key, "product:p1");
        assert!(!key.starts_with(PRODUCTS_PREFIX));
        assert!(products_page(1, 20).starts_with(PRODUCTS_PREFIX));
    }

    #[test]
    fn test_scoped_prefixes() {
        let category = CategoryId::new();
        assert_eq!(
            category_products_prefix(category),
            format!("category:{category}:products")
        );
        let customer = CustomerId::new();
        assert!(customer_orders_prefix(customer).starts_with("orders:customer:"));
    }
}
