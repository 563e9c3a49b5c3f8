//! MQTT topic filter matching (`+` single level, `#` remaining levels).

pub fn filter_matches(filter: &str, topic: &str) -> bool {
    let mut filter_levels = filter.split('/');
    let mut topic_levels = topic.split('/');

    loop {
        match (filter_levels.next(), topic_levels.next()) {
            // `#` swallows the rest of the topic, including zero levels.
            (Some("#"), _) => return true,
            (Some("+"), Some(_)) => continue,
            (Some(pattern), Some(level)) if pattern == level => continue,
            (None, None) => return true,
            _ => return false,
        }
    }
}
