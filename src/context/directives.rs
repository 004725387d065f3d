//! System directives appended to a trimmed history before completion.

use crate::types::{Message, OrderDetails, Product};

/// Lists the products found and asks the assistant to recommend them.
pub fn products_found(products: &[Product]) -> Message {
    let listing = products
        .iter()
        .map(|p| {
            if p.price.is_empty() {
                p.name.clone()
            } else {
                format!("{} ({})", p.name, p.price)
            }
        })
        .collect::<Vec<_>>()
        .join(", ");

    Message::system(format!(
        "Folgende Produkte wurden gefunden: {}. Bitte empfehle in deiner Antwort diese \
         spezifischen Produkte dem Benutzer und gib eine kurze Beschreibung zu jedem Buch.",
        listing
    ))
}

pub fn no_products_found() -> Message {
    Message::system(
        "Es wurden keine spezifischen Produkte für diese Anfrage gefunden. Bitte informiere \
         den Benutzer darüber und schlage vor, die Suche zu verfeinern oder nach anderen \
         Produkten zu suchen.",
    )
}

/// Summarizes an order so the assistant can answer status questions.
pub fn order_found(order: &OrderDetails) -> Message {
    let items = order
        .line_items
        .iter()
        .map(|item| format!("{} (x{}, {} {})", item.name, item.quantity, item.total, order.currency))
        .collect::<Vec<_>>()
        .join(", ");
    let shipped = if order.shipped { "ja" } else { "nein" };

    Message::system(format!(
        "Bestellung {}: Status \"{}\", versendet: {}, erstellt am {}, Gesamtbetrag {} {}. \
         Artikel: {}. Bitte informiere den Benutzer über den Stand dieser Bestellung.",
        order.number, order.status, shipped, order.date_created, order.total, order.currency, items
    ))
}

pub fn order_not_found(order_number: &str) -> Message {
    Message::system(format!(
        "Zur Bestellnummer {} wurde keine passende Bestellung gefunden. Bitte bitte den \
         Benutzer, Bestellnummer und Postleitzahl zu überprüfen.",
        order_number
    ))
}

pub fn persona(prompt: &str) -> Message {
    Message::system(prompt)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{MessageRole, OrderLineItem};

    fn product(name: &str, price: &str) -> Product {
        Product {
            id: 1,
            name: name.to_string(),
            price: price.to_string(),
            description: None,
            permalink: None,
            image_url: None,
            categories: vec![],
        }
    }

    #[test]
    fn test_products_found_lists_names_and_prices() {
        let msg = products_found(&[product("Der Prozess", "19.90"), product("Das Schloss", "")]);
        assert_eq!(msg.role, MessageRole::System);
        assert!(msg.content.contains("Der Prozess (19.90), Das Schloss."));
    }

    #[test]
    fn test_order_found_mentions_shipping_state() {
        let order = OrderDetails {
            number: "1042".into(),
            status: "completed".into(),
            shipped: true,
            date_created: "2024-03-01T10:00:00".into(),
            total: "39.80".into(),
            currency: "CHF".into(),
            line_items: vec![OrderLineItem {
                name: "Der Prozess".into(),
                quantity: 2,
                total: "39.80".into(),
            }],
        };
        let msg = order_found(&order);
        assert!(msg.content.contains("Bestellung 1042"));
        assert!(msg.content.contains("versendet: ja"));
        assert!(msg.content.contains("Der Prozess (x2, 39.80 CHF)"));
    }
}
