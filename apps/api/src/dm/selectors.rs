//! Selector chains for the job platform's messaging UI.

use std::time::Duration;

use super::driver::{Selector, SelectorChain};

pub const MESSAGE_BUTTON: SelectorChain = SelectorChain {
    name: "message button",
    selectors: &[
        Selector::XPath("//button[contains(., 'Message')]"),
        Selector::Css("button[aria-label='Message']"),
        Selector::XPath("//a[contains(., 'Message')]"),
        Selector::Css("button[class*='message']"),
        Selector::XPath("//button[contains(text(), 'Message')]"),
        Selector::XPath("//*[contains(text(), 'Message') and (self::button or self::a)]"),
    ],
    timeout: Duration::from_secs(5),
};

pub const MESSAGE_BOX: SelectorChain = SelectorChain {
    name: "message box",
    selectors: &[
        Selector::Css("textarea"),
        Selector::Css("textarea[placeholder*='message' i]"),
        Selector::Css("textarea[aria-label*='message' i]"),
        Selector::Css("div[contenteditable='true']"),
        Selector::Css("div[role='textbox']"),
        Selector::XPath("//textarea[contains(@placeholder, 'Type')]"),
    ],
    timeout: Duration::from_secs(10),
};

pub const SEND_BUTTON: SelectorChain = SelectorChain {
    name: "send button",
    selectors: &[
        Selector::XPath("//button[contains(., 'Send')]"),
        Selector::XPath("//button[@type='submit' and contains(., 'Send')]"),
        Selector::Css("button[aria-label*='Send']"),
        Selector::Css("button[aria-label*='send']"),
        Selector::Css("button[type='submit']"),
        Selector::XPath("//button[contains(text(), 'Send')]"),
    ],
    timeout: Duration::from_secs(5),
};

/// Profile header; the recruiter's name follows the word "Message".
pub const PROFILE_HEADING: Selector = Selector::Css("h1");

/// Section headings on a profile; one of them is usually the job title.
pub const PROFILE_SUBHEADING: Selector = Selector::Css("h2");

/// Any page body, used to confirm a page rendered after login.
pub const PAGE_BODY: Selector = Selector::Css("body");
