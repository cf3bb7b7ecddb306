//! Page scripts evaluated through `Runtime.evaluate`.
//!
//! Dynamic values are spliced in as JSON literals, so prompts and selectors
//! never need hand escaping.

use crate::locator::LocatorStrategy;

const INJECT_TEMPLATE: &str = r#"
(function() {
    var msg = __MESSAGE__;
    var selectors = __SELECTORS__;
    var target = null;
    for (var i = 0; i < selectors.length && !target; i++) {
        var list;
        try { list = document.querySelectorAll(selectors[i]); } catch (e) { continue; }
        for (var j = 0; j < list.length; j++) {
            if (list[j].offsetWidth > 0 && list[j].offsetHeight > 0) { target = list[j]; break; }
        }
    }
    if (!target) { return false; }
    target.focus();
    if (target.tagName === 'TEXTAREA' || target.tagName === 'INPUT') {
        var proto = target.tagName === 'TEXTAREA' ? HTMLTextAreaElement.prototype : HTMLInputElement.prototype;
        var desc = Object.getOwnPropertyDescriptor(proto, 'value');
        if (desc && desc.set) { desc.set.call(target, msg); } else { target.value = msg; }
        target.dispatchEvent(new InputEvent('input', { data: msg, inputType: 'insertText', bubbles: true }));
        target.dispatchEvent(new Event('change', { bubbles: true }));
    } else {
        target.textContent = msg;
        target.dispatchEvent(new InputEvent('input', { data: msg, inputType: 'insertText', bubbles: true }));
    }
    target.focus();
    return true;
})()
"#;

const REPLY_TEMPLATE: &str = r#"
(function() {
    var rootSel = __ROOTS__;
    var anySel = __FALLBACK__;
    var welcome = __WELCOME__;
    function getText(el) {
        if (!el) return '';
        var t = el.innerText || el.textContent || '';
        return (typeof t === 'string' ? t : '').trim();
    }
    function isWelcome(t) {
        for (var i = 0; i < welcome.length; i++) { if (t.indexOf(welcome[i]) >= 0) return true; }
        return false;
    }
    function codeLang(node) {
        var code = node.tagName === 'CODE' ? node : node.querySelector('code');
        var cls = ((code || node).getAttribute('class') || '');
        var m = cls.match(/language-([\w+#-]+)/);
        return m ? m[1] : '';
    }
    function toMarkdown(el) {
        var out = [];
        function walk(node) {
            if (node.nodeType === 1) {
                var tag = (node.tagName || '').toUpperCase();
                if (tag === 'PRE') {
                    var code = node.querySelector('code') || node;
                    var block = code.innerText || code.textContent || '';
                    if (block) out.push('```' + codeLang(node) + '\n' + block.trim() + '\n```');
                    return;
                }
                for (var i = 0; i < node.childNodes.length; i++) walk(node.childNodes[i]);
            } else if (node.nodeType === 3) {
                var t = (node.textContent || '').trim();
                if (t) out.push(t);
            }
        }
        walk(el);
        return out.join('\n\n').trim() || getText(el);
    }
    function inDocOrder(a, b) {
        return (a.compareDocumentPosition(b) & Node.DOCUMENT_POSITION_FOLLOWING) ? -1 : 1;
    }
    function collect(selectors, climb) {
        var found = [];
        for (var s = 0; s < selectors.length; s++) {
            var list;
            try { list = document.querySelectorAll(selectors[s]); } catch (e) { continue; }
            for (var i = 0; i < list.length; i++) {
                var el = list[i];
                if (climb && el.closest) {
                    for (var r = 0; r < rootSel.length; r++) {
                        var root = null;
                        try { root = el.closest(rootSel[r]); } catch (e) {}
                        if (root) { el = root; break; }
                    }
                }
                var t = getText(el);
                if (t.length < 3 || isWelcome(t)) continue;
                found.push(el);
            }
            if (!climb && found.length > 0) return found;
        }
        return found;
    }
    var nodes = collect(rootSel, false);
    if (nodes.length === 0) nodes = collect(anySel, true);
    if (nodes.length === 0) return '';
    nodes.sort(inDocOrder);
    return toMarkdown(nodes[nodes.length - 1]);
})()
"#;

pub fn js_string(value: &str) -> String {
    serde_json::to_string(value).unwrap_or_else(|_| "\"\"".to_string())
}

/// Script that types `message` into the first visible input; evaluates to a bool.
pub fn inject_script(message: &str, input: &LocatorStrategy) -> String {
    INJECT_TEMPLATE
        .replace("__SELECTORS__", &input.to_js_array())
        .replace("__MESSAGE__", &js_string(message))
}

/// Script that evaluates to the last assistant message, or an empty string.
pub fn reply_script(
    roots: &LocatorStrategy,
    fallback: &LocatorStrategy,
    welcome_markers: &[String],
) -> String {
    let welcome = serde_json::to_string(welcome_markers).unwrap_or_else(|_| "[]".to_string());
    REPLY_TEMPLATE
        .replace("__ROOTS__", &roots.to_js_array())
        .replace("__FALLBACK__", &fallback.to_js_array())
        .replace("__WELCOME__", &welcome)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inject_script_embeds_message_as_json_literal() {
        let script = inject_script(
            "line one\nit's \"quoted\" </script>",
            &LocatorStrategy::new("input", ["textarea"]),
        );
        assert!(script.contains(r#"var msg = "line one\nit's \"quoted\" </script>";"#));
        assert!(script.contains(r#"var selectors = ["textarea"];"#));
        assert!(!script.contains("__MESSAGE__"));
    }

    #[test]
    fn message_containing_placeholder_text_is_not_rewritten() {
        let script = inject_script("__SELECTORS__", &LocatorStrategy::default_input());
        assert!(script.contains(r#"var msg = "__SELECTORS__";"#));
    }

    #[test]
    fn reply_script_embeds_all_lists() {
        let script = reply_script(
            &LocatorStrategy::new("roots", ["article"]),
            &LocatorStrategy::new("fallback", ["pre"]),
            &["How can I help".to_string()],
        );
        assert!(script.contains(r#"var rootSel = ["article"];"#));
        assert!(script.contains(r#"var anySel = ["pre"];"#));
        assert!(script.contains(r#"var welcome = ["How can I help"];"#));
    }
}
