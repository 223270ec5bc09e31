//! XEP-0004 data forms.

use natter_core::event::{DataForm, FormField, FormOption, FormType};

use crate::element::Element;
use crate::ns;

/// Find and parse the first `jabber:x:data` form below `payload`.
pub fn find_form(payload: &Element) -> Option<DataForm> {
    payload.get_child("x", ns::DATA_FORMS).map(parse_form)
}

pub fn parse_form(x: &Element) -> DataForm {
    let form_type = match x.attr("type") {
        Some("submit") => FormType::Submit,
        Some("cancel") => FormType::Cancel,
        Some("result") => FormType::Result,
        _ => FormType::Form,
    };

    let fields = x
        .children_named("field", ns::DATA_FORMS)
        .map(|field| FormField {
            var: field.attr("var").map(str::to_string),
            label: field.attr("label").map(str::to_string),
            field_type: field.attr("type").map(str::to_string),
            required: field.has_child("required", ns::DATA_FORMS),
            values: field
                .children_named("value", ns::DATA_FORMS)
                .map(Element::text)
                .collect(),
            options: field
                .children_named("option", ns::DATA_FORMS)
                .map(|option| FormOption {
                    label: option.attr("label").map(str::to_string),
                    value: option.child_text("value", ns::DATA_FORMS).unwrap_or_default(),
                })
                .collect(),
        })
        .collect();

    DataForm {
        form_type,
        title: x.child_text("title", ns::DATA_FORMS),
        instructions: x.child_text("instructions", ns::DATA_FORMS),
        fields,
    }
}

/// A `submit` form carrying only field names and values.
pub fn submit_form(fields: &[FormField]) -> Element {
    let mut x = Element::new("x", ns::DATA_FORMS).with_attr("type", FormType::Submit.as_str());
    for field in fields {
        let Some(var) = field.var.as_deref() else {
            continue;
        };
        let mut element = Element::new("field", ns::DATA_FORMS).with_attr("var", var);
        for value in &field.values {
            element.push_child(Element::new("value", ns::DATA_FORMS).with_text(value.as_str()));
        }
        x.push_child(element);
    }
    x
}

pub fn cancel_form() -> Element {
    Element::new("x", ns::DATA_FORMS).with_attr("type", FormType::Cancel.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn owner_form() -> Element {
        Element::new("query", ns::MUC_OWNER).with_child(
            Element::new("x", ns::DATA_FORMS)
                .with_attr("type", "form")
                .with_child(Element::new("title", ns::DATA_FORMS).with_text("Configure lobby"))
                .with_child(
                    Element::new("field", ns::DATA_FORMS)
                        .with_attr("var", "muc#roomconfig_persistentroom")
                        .with_attr("type", "boolean")
                        .with_child(Element::new("value", ns::DATA_FORMS).with_text("0")),
                )
                .with_child(
                    Element::new("field", ns::DATA_FORMS)
                        .with_attr("var", "muc#roomconfig_whois")
                        .with_attr("type", "list-single")
                        .with_child(Element::new("required", ns::DATA_FORMS))
                        .with_child(
                            Element::new("option", ns::DATA_FORMS)
                                .with_attr("label", "Moderators")
                                .with_child(
                                    Element::new("value", ns::DATA_FORMS).with_text("moderators"),
                                ),
                        ),
                ),
        )
    }

    #[test]
    fn parses_fields_options_and_title() {
        let form = find_form(&owner_form()).expect("form present");
        assert_eq!(form.form_type, FormType::Form);
        assert_eq!(form.title.as_deref(), Some("Configure lobby"));
        assert_eq!(form.fields.len(), 2);

        let persistent = form.field("muc#roomconfig_persistentroom").unwrap();
        assert_eq!(persistent.values, vec!["0".to_string()]);
        assert_eq!(persistent.field_type.as_deref(), Some("boolean"));

        let whois = form.field("muc#roomconfig_whois").unwrap();
        assert!(whois.required);
        assert_eq!(whois.options[0].value, "moderators");
    }

    #[test]
    fn missing_form_is_none() {
        assert!(find_form(&Element::new("query", ns::MUC_OWNER)).is_none());
    }

    #[test]
    fn submit_skips_fields_without_var() {
        let fields = vec![
            FormField::new("muc#roomconfig_roomname", vec!["Lobby".to_string()]),
            FormField::default(),
        ];
        let x = submit_form(&fields);
        assert_eq!(x.attr("type"), Some("submit"));
        assert_eq!(x.children().count(), 1);
        assert_eq!(
            x.to_string(),
            "<x xmlns='jabber:x:data' type='submit'><field var='muc#roomconfig_roomname'><value>Lobby</value></field></x>"
        );
    }
}
